// Small front-end over the library: inspect a database file, check the
// stream format, export the files of a catalog table. The library itself has
// no command-line surface; this binary is one caller of it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use onecd::Database;

fn usage() -> ! {
    eprintln!("usage: onecd <file.1CD> [tables | check | files <TABLE> <DIR>]");
    std::process::exit(2);
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("tables");
    let mut db = Database::open(&path, false)
        .with_context(|| format!("opening {}", path.display()))?;

    match command {
        "tables" => {
            println!(
                "version {}  role {:?}  {} tables",
                db.version(),
                db.role(),
                db.num_tables()
            );
            for table in db.tables() {
                println!(
                    "  {:<32} {:>4} fields  record {:>5} bytes",
                    table.name(),
                    table.num_fields(),
                    table.record_len()
                );
            }
        }
        "check" => {
            db.test_stream_format().context("stream format check")?;
            println!("stream format ok");
        }
        "files" => {
            let table = args.get(2).cloned().unwrap_or_else(|| usage());
            let dir = args.get(3).map(PathBuf::from).unwrap_or_else(|| usage());
            export_files(&mut db, &table, &dir)?;
        }
        other => bail!("unknown command {:?}", other),
    }
    Ok(())
}

fn export_files(db: &mut Database, table: &str, dir: &Path) -> Result<()> {
    let files = db
        .files_of(table)
        .with_context(|| format!("reading catalog table {}", table))?;
    std::fs::create_dir_all(dir)?;
    let mut count = 0;
    for file in files.files() {
        std::fs::write(dir.join(&file.name), &file.data)
            .with_context(|| format!("writing {}", file.name))?;
        count += 1;
    }
    println!("exported {} files from {} to {}", count, table, dir.display());
    Ok(())
}
