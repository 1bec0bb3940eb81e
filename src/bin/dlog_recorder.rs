//! DLOG recorder binary
//!
//! Usage:
//!   cargo run --bin dlog_recorder -- record -t 5 -p 0.1 -c 1 -i u -i i
//!   cargo run --bin dlog_recorder -- -f config.toml record --manual-trigger
//!   cargo run --bin dlog_recorder -- info recordings/run.dlog -n 20

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dlog_recorder::common::cli::{Cli, Command, InfoArgs, ItemArg, RecordArgs};
use dlog_recorder::common::shutdown::setup_shutdown;
use dlog_recorder::common::RecordingState;
use dlog_recorder::config::Config;
use dlog_recorder::recorder::{
    DlogFileReader, FsStorage, Recorder, RecordingEngine, RecordingParameters, ResourceType,
    TriggerSource,
};
use dlog_recorder::simulator::SimulatedChannels;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dlog_recorder=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = if Path::new(&cli.common.config_file).exists() {
        let config = Config::load(&cli.common.config_file)
            .with_context(|| format!("loading {}", cli.common.config_file))?;
        info!(config_file = %cli.common.config_file, "Loaded configuration");
        config
    } else {
        info!(config_file = %cli.common.config_file, "Config file not found, using defaults");
        Config::default()
    };

    match cli.command {
        Command::Record(args) => record(config, args).await,
        Command::Info(args) => print_info(&args),
    }
}

fn build_params(config: &Config, args: &RecordArgs) -> anyhow::Result<RecordingParameters> {
    let mut params = RecordingParameters::from(&config.defaults);
    if let Some(period) = args.period {
        params.period = period;
    }
    if let Some(duration) = args.duration {
        params.duration = duration;
    }
    if let Some(comment) = &args.comment {
        params.comment = comment.clone();
    }
    if args.manual_trigger {
        params.trigger_source = TriggerSource::Manual;
    }

    let channels = if args.channels.is_empty() {
        vec![1]
    } else {
        args.channels.clone()
    };
    let items = if args.items.is_empty() {
        vec![ItemArg::U, ItemArg::I]
    } else {
        args.items.clone()
    };
    for &ch in &channels {
        anyhow::ensure!(
            ch >= 1 && (ch as usize) <= config.simulator.channels,
            "channel {} out of range 1..={}",
            ch,
            config.simulator.channels
        );
        for item in &items {
            let resource = match item {
                ItemArg::U => ResourceType::Voltage,
                ItemArg::I => ResourceType::Current,
                ItemArg::P => ResourceType::Power,
            };
            params.enable_item(ch - 1, resource, true);
        }
        for &pin in &args.digital_inputs {
            params.enable_item(ch - 1, ResourceType::DigitalInput(pin), true);
        }
    }

    let dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.defaults.output_dir.clone());
    let name = args.output.clone().unwrap_or_else(|| {
        chrono::Local::now()
            .format("dlog_%Y%m%d_%H%M%S.dlog")
            .to_string()
            .into()
    });
    params.file_path = dir.join(name).to_string_lossy().into_owned();
    Ok(params)
}

async fn record(config: Config, args: RecordArgs) -> anyhow::Result<()> {
    let params = build_params(&config, &args)?;
    let path = params.file_path.clone();

    let engine = RecordingEngine::new(
        config.recorder.clone(),
        config.defaults.clone(),
        Box::new(FsStorage::new()),
        Box::new(SimulatedChannels::new(config.simulator.clone())),
    );
    let counters = engine.counters();
    let (recorder, handle) = Recorder::new(engine, &config.recorder);

    let (shutdown_tx, shutdown_rx) = setup_shutdown();
    let mut stop_rx = shutdown_tx.subscribe();
    let task = tokio::spawn(recorder.run(shutdown_rx));

    println!("========================================");
    println!("    DLOG Recorder Started");
    println!("========================================");
    println!();
    println!("  Output:    {}", path);
    println!("  Period:    {} s", params.period);
    println!("  Duration:  {} s", params.duration);
    println!("  Items:     {}", params.items.len());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!("========================================");

    handle.set_params(params).await?;
    handle.initiate().await?;

    if args.manual_trigger {
        println!("Armed. Press Enter to trigger.");
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        tokio::select! {
            _ = lines.next_line() => handle.trigger_generated().await?,
            _ = stop_rx.recv() => {}
        }
    }

    if let Some(every) = args.bookmark_every.filter(|s| *s > 0.0) {
        let bookmarks = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs_f64(every));
            interval.tick().await;
            let mut n = 1u32;
            loop {
                interval.tick().await;
                if !bookmarks.is_executing() {
                    break;
                }
                if bookmarks.log_bookmark(format!("mark {}", n)).await.is_err() {
                    break;
                }
                n += 1;
            }
        });
    }

    tokio::select! {
        result = handle.wait_for_state(RecordingState::Idle) => {
            if let Err(e) = result {
                warn!(error = %e, "Recorder task ended unexpectedly");
            }
        }
        _ = stop_rx.recv() => {}
    }

    let status = handle.status();
    let _ = shutdown_tx.send(());
    task.await.context("recorder task panicked")?;

    let snapshot = counters.snapshot();
    println!();
    println!("Recording finished: {}", path);
    println!("  Rows:        {}", snapshot.rows);
    println!("  Bookmarks:   {}", snapshot.bookmarks);
    println!("  Written:     {}", snapshot.format_bytes_flushed());
    if let Some(err) = status.last_error {
        println!("  Last error:  {}", err);
    }
    Ok(())
}

fn print_info(args: &InfoArgs) -> anyhow::Result<()> {
    let file = File::open(&args.file).with_context(|| format!("opening {}", args.file.display()))?;
    let mut reader = DlogFileReader::new(file)?;
    let header = reader.header().clone();
    let rows = reader.read_rows()?;
    let bookmarks = reader.read_bookmarks()?;
    let x_value = |row: usize| header.x_axis.range.min as f64 + row as f64 * header.x_axis.step as f64;

    if args.json {
        let shown: Vec<_> = rows
            .iter()
            .take(args.rows)
            .enumerate()
            .map(|(i, row)| {
                let values: Vec<f64> = row
                    .values
                    .iter()
                    .zip(&header.y_axes)
                    .map(|(&raw, y)| y.physical(raw))
                    .collect();
                serde_json::json!({ "x": x_value(i), "valid": row.valid, "values": values })
            })
            .collect();
        let out = serde_json::json!({
            "version": header.version,
            "comment": header.comment,
            "start_time": header.start_time,
            "duration": header.final_duration,
            "data_size": header.data_size,
            "row_count": rows.len(),
            "x_axis": header.x_axis,
            "y_axes": header.y_axes,
            "rows": shown,
            "bookmarks": bookmarks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let started = chrono::DateTime::from_timestamp(header.start_time as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| header.start_time.to_string());
    println!("File:        {}", args.file.display());
    println!("Version:     {}", header.version);
    println!("Comment:     {}", header.comment);
    println!("Started:     {}", started);
    println!("Duration:    {:.3} s", header.final_duration);
    println!("Rows:        {} (header: {})", rows.len(), header.data_size);
    println!(
        "X axis:      step {} {}, range {}..{}",
        header.x_axis.step,
        header.x_axis.unit.symbol(),
        header.x_axis.range.min,
        header.x_axis.range.max
    );
    for (i, y) in header.y_axes.iter().enumerate() {
        println!(
            "Y axis {:>2}:  {:<8} {:?} [{}] {}..{}",
            i + 1,
            y.label,
            y.data_type,
            y.unit.symbol(),
            y.range.min,
            y.range.max
        );
    }

    for (i, row) in rows.iter().take(args.rows).enumerate() {
        let values: Vec<String> = row
            .values
            .iter()
            .zip(&header.y_axes)
            .map(|(&raw, y)| format!("{:.4}", y.physical(raw)))
            .collect();
        let marker = if row.valid { "" } else { " (invalid)" };
        println!("{:>10.3}  {}{}", x_value(i), values.join("  "), marker);
    }
    if rows.len() > args.rows {
        println!("... {} more rows", rows.len() - args.rows);
    }

    for b in &bookmarks {
        println!("Bookmark @ row {}: {}", b.position, b.text);
    }
    Ok(())
}
