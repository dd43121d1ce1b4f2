#[macro_use]
extern crate prettytable;

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use perfdump::{DatasetDump, DumpFile};
use prettytable::{Cell, Row, Table};

#[derive(Parser, Debug)]
struct Opt {
    /// The dump file, usually `perf-dump.pdump`
    file: PathBuf,

    /// Only show this counter (may be repeated)
    #[arg(short = 'd', long = "dataset")]
    datasets: Vec<String>,

    /// Only show this persisted step (may be repeated)
    #[arg(short = 't', long = "step")]
    steps: Vec<u64>,

    /// Print JSON instead of tables
    #[arg(long = "json")]
    json: bool,
}

fn select(dump: &DumpFile, opt: &Opt) -> Result<Vec<DatasetDump>, Box<dyn Error>> {
    let names: Vec<String> = if opt.datasets.is_empty() {
        dump.datasets().to_vec()
    } else {
        opt.datasets.clone()
    };

    for step in &opt.steps {
        if *step >= dump.num_steps() {
            return Err(format!(
                "step {} is out of range, the file has {} persisted steps",
                step,
                dump.num_steps()
            )
            .into());
        }
    }

    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let mut dataset = dump
            .dataset(&name)
            .ok_or_else(|| format!("no dataset named {:?} in {}", name, dump.path().display()))?;

        if !opt.steps.is_empty() {
            for row in &mut dataset.values {
                let picked: Vec<i64> = opt.steps.iter().map(|&step| row[step as usize]).collect();
                *row = picked;
            }
            dataset.num_steps = opt.steps.len() as u64;
        }
        selected.push(dataset);
    }
    Ok(selected)
}

fn print_table(dataset: &DatasetDump, steps: &[u64]) {
    let mut table = Table::new();

    let mut header = vec![Cell::new("Rank")];
    if steps.is_empty() {
        header.extend((0..dataset.num_steps).map(|step| Cell::new(&step.to_string())));
    } else {
        header.extend(steps.iter().map(|step| Cell::new(&step.to_string())));
    }
    table.add_row(Row::new(header));

    for (rank, values) in dataset.values.iter().enumerate() {
        let mut row = vec![Cell::new(&rank.to_string())];
        row.extend(values.iter().map(|v| Cell::new(&v.to_string())));
        table.add_row(Row::new(row));
    }

    println!("{}", dataset.name);
    table.printstd();
    println!();
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::parse();

    let dump = DumpFile::open(&opt.file)?;
    let selected = select(&dump, &opt)?;

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }

    let mut summary = Table::new();
    summary.add_row(row!["Datasets", "Processes", "Persisted steps", "Chunk extent"]);
    summary.add_row(row![
        dump.datasets().len(),
        dump.num_processes(),
        dump.num_steps(),
        dump.chunk_extent(),
    ]);
    summary.printstd();
    println!();

    for dataset in &selected {
        print_table(dataset, &opt.steps);
    }

    Ok(())
}
