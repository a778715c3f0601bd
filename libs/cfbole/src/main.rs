use anyhow::{bail, Context};
use cfbole::{crypto::OleCrypto, Ole, OleError};
use std::fs::File;
use std::io::{self, BufReader, Write};
use tracing_subscriber::prelude::*;

fn usage(me: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("{} <olefile>", me);
    eprintln!("  Lists all entries in <olefile>");
    eprintln!("{} <olefile> <entry>", me);
    eprintln!("  Prints the details of the Ole <entry> in <olefile>");
    eprintln!("{} <olefile> <stream> <output>", me);
    eprintln!("  Extracts <stream> from <olefile> and writes it to <output>");
    eprintln!("{} <olefile> --test", me);
    eprintln!("  Tests all streams in <olefile>");
    eprintln!("{} <olefile> --decrypt", me);
    eprintln!("  Prints encryption information from <olefile>");
    eprintln!("{} <olefile> --decrypt <password> <output>", me);
    eprintln!("  Decrypts encrypted <olefile> with <password> into <output>");
    std::process::exit(1);
}

fn output(to: &str) -> Result<Box<dyn Write>, io::Error> {
    Ok(match to {
        "-" => Box::new(io::stdout()),
        _ => Box::new(File::create(to)?),
    })
}

fn print_anomalies(header: &str, indent: &str, anomalies: &[String]) {
    if !anomalies.is_empty() {
        eprintln!("{indent}Warning: the following {header} defects were encountered");
        for an in anomalies {
            eprintln!("{indent}  - {an}");
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if !(2..=5).contains(&args.len()) {
        usage(&args[0]);
    }

    let docfname = &args[1];
    let f = File::open(docfname).with_context(|| format!("Failed to open {docfname}"))?;
    let ole = Ole::new(BufReader::new(f)).context("Failed to parse the Ole file")?;

    if args.len() == 2 {
        for (path, entry) in ole.ftw() {
            let kind = if entry.is_storage() {
                "storage"
            } else {
                "stream"
            };
            println!("[{}] {:?} ({} bytes)", kind, path, entry.size);
        }
    } else if args.len() == 3 && args[2] == "--test" {
        print_anomalies("Ole", "", ole.anomalies());
        let mut exit_code = 0;
        for (name, entry) in ole.ftw() {
            if entry.is_storage() {
                eprintln!("{name}/: OK");
            } else {
                match ole.read_stream(entry) {
                    Ok(_) => eprintln!("{name}: OK"),
                    Err(e) => {
                        exit_code = 1;
                        eprintln!("{name}: {e}");
                    }
                }
            }
            print_anomalies("Entry", "  ", &entry.anomalies);
        }
        std::process::exit(exit_code);
    } else if [3, 5].contains(&args.len()) && args[2] == "--decrypt" {
        let ole_crypto =
            OleCrypto::new(&ole).context("Encryption not present or not supported")?;
        if args.len() == 3 {
            eprintln!("{:#?}", ole_crypto);
        } else {
            let key = ole_crypto.get_key(&args[3]).context("Wrong password")?;
            eprintln!("Password ok! {key:?}");
            let plain = ole_crypto
                .decrypt(&key, &ole)
                .context("Failed to decrypt the package")?;
            output(&args[4])
                .and_then(|mut w| w.write_all(&plain))
                .context("Failed to write output file")?;
        }
    } else {
        let entry = match ole.get_entry_by_name(&args[2]) {
            Ok(v) => v,
            Err(OleError::NotFound(_)) => bail!("The requested entry could not be found"),
            Err(e) => return Err(e).context("An Ole parse problem was encountered"),
        };
        if args.len() == 3 {
            println!("Details for {}:", entry.name);
            println!("{:#?}", entry);
        } else {
            let data = ole.read_stream(entry).context("Failed to read the stream")?;
            output(&args[3])
                .and_then(|mut w| w.write_all(&data))
                .context("Failed to write output file")?;
        }
    }
    Ok(())
}
