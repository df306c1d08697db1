use log::{error, info, warn, LevelFilter};
use pdf_darken::{ConvertOptions, Converter};
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// PDFs in the working directory that are not results of an earlier run
fn inputs_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        let is_output = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("output_"));
        if is_pdf && !is_output && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

fn main() -> ExitCode {
    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Info).env().init() {
        eprintln!("Cannot install logger: {}", e);
    }

    let dir = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("Cannot read working directory: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let inputs = match inputs_in(&dir) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("Cannot list {}: {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if inputs.is_empty() {
        warn!("No PDF files found in {}", dir.display());
        return ExitCode::FAILURE;
    }

    let converter = Converter::new(&ConvertOptions::default());
    let mut failed = 0;
    for input in &inputs {
        match converter.darken_file(input) {
            Ok(output) => info!("{} -> {}", input.display(), output.display()),
            Err(e) => {
                error!("{}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!("{} of {} documents failed", failed, inputs.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
