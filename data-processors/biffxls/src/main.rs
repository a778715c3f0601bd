use anyhow::Context;
use biffxls::{DecoderOptions, Worksheet, Xls};
use std::fs::File;
use std::io::BufReader;
use tracing_subscriber::prelude::*;

fn usage(me: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("{me} <xlsfile> [--password <password>]");
    eprintln!("  Lists the sheets of <xlsfile>");
    eprintln!("{me} <xlsfile> [--password <password>] <sheet>");
    eprintln!("  Prints the rows of <sheet> (a name or a zero-based index)");
    std::process::exit(1);
}

fn print_anomalies(header: &str, anomalies: &[String]) {
    if !anomalies.is_empty() {
        eprintln!("Warning: the following {header} defects were encountered");
        for an in anomalies {
            eprintln!("  - {an}");
        }
    }
}

fn print_sheet(sheet: &Worksheet) -> Result<(), anyhow::Error> {
    let dims = sheet.dimensions()?;
    eprintln!("{} ({}x{})", sheet.name(), dims.rows, dims.columns);
    print_anomalies("sheet", sheet.anomalies()?);
    let mut rows = sheet.rows()?;
    for row in rows.by_ref() {
        let row = row.with_context(|| format!("Failed to read sheet {}", sheet.name()))?;
        let line = row
            .cells
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        println!("{line}");
    }
    print_anomalies("row", rows.anomalies());
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let me = args.first().cloned().unwrap_or_else(|| "biffxls".to_string());
    let mut options = DecoderOptions::new().context("Failed to load the configuration")?;
    if let Some(pos) = args.iter().position(|a| a == "--password") {
        if pos + 1 >= args.len() {
            usage(&me);
        }
        let password = args.remove(pos + 1);
        args.remove(pos);
        options = options.with_password(&password);
    }
    if !(2..=3).contains(&args.len()) {
        usage(&me);
    }

    let fname = &args[1];
    let f = File::open(fname).with_context(|| format!("Failed to open {fname}"))?;
    let xls = Xls::open(BufReader::new(f), &options)
        .with_context(|| format!("Failed to decode {fname}"))?;
    if let Some(encryption) = xls.encryption() {
        eprintln!("Encrypted with {}", encryption.algorithm);
    }
    let workbook = xls.workbook();
    print_anomalies("workbook", workbook.anomalies());

    match args.get(2) {
        None => {
            println!(
                "{} workbook, code page {:?}, {} date system",
                workbook.version(),
                workbook.codepage(),
                if workbook.date1904() { 1904 } else { 1900 }
            );
            for sheet in workbook.sheets() {
                println!(
                    "[{}] {:?} {:?} ({}) at 0x{:x}",
                    sheet.index,
                    sheet.name,
                    sheet.sheet_type,
                    sheet.visibility.name(),
                    sheet.offset()
                );
            }
        }
        Some(which) => {
            let sheet = match which.parse::<usize>() {
                Ok(index) => workbook.worksheet(index),
                Err(_) => workbook.worksheet_by_name(which),
            }
            .with_context(|| format!("Failed to open sheet {which}"))?;
            print_sheet(&sheet)?;
        }
    }
    Ok(())
}
