//! Sweep regularization weight and data loss on a synthetic phantom.

use slice_srr::config::study;
use slice_srr::image::io::write_json_file;
use slice_srr::study::{run_study, StudyRecord};
use slice_srr::synthetic::{phantom, simulate_stack};
use slice_srr::CancellationToken;
use std::env;
use std::path::Path;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config_path = env::args()
        .nth(1)
        .ok_or_else(|| "Usage: parameter_study <config.json>".to_string())?;
    let config = study::load_config(Path::new(&config_path))?;

    let truth = phantom(&config.phantom).map_err(|e| e.to_string())?;
    let stacks = config
        .stacks
        .iter()
        .map(|s| simulate_stack(&s.name, &truth, &s.simulation, &config.psf).map(|(stack, _)| stack))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let records = run_study(
        &stacks,
        &truth,
        &config.base_config(),
        &config.study,
        &CancellationToken::new(),
    )
    .map_err(|e| e.to_string())?;
    print_table(&records);

    if let Some(path) = &config.json_out {
        write_json_file(path, &records)?;
        println!("\nStudy records written to {}", path.display());
    }
    Ok(())
}

fn print_table(records: &[StudyRecord]) {
    println!(
        "{:>4} {:>8} {:>8} {:>8} {:>6} {:>10} {:>10} {:>8} {:>8}",
        "#", "reg", "loss", "scale", "alpha", "rmse", "psnr", "ncc", "ms"
    );
    for r in records {
        let c = &r.combination;
        match (&r.metrics, &r.error) {
            (Some(m), _) => println!(
                "{:>4} {:>8} {:>8} {:>8} {:>6} {:>10.4e} {:>10.2} {:>8.4} {:>8.0}",
                c.index,
                c.regularization.name(),
                c.data_loss.name(),
                c.loss_scale,
                c.alpha,
                m.rmse,
                m.psnr,
                m.ncc,
                r.elapsed_ms
            ),
            (None, err) => println!(
                "{:>4} {:>8} {:>8} {:>8} {:>6} failed: {}",
                c.index,
                c.regularization.name(),
                c.data_loss.name(),
                c.loss_scale,
                c.alpha,
                err.as_deref().unwrap_or("no volume")
            ),
        }
    }
}
