use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};

use archive_dsp::panel::PathPanel;
use archive_dsp::task::{LogProgress, TaskSettings};
use archive_dsp::{
    ArchiveDsProcessor, AutoIngestProcessor, DataSourceProcessor, Detectable, IngestCallback,
    IngestResult, cli, config, logging,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    if cli_opts.json {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut settings = TaskSettings::from_config(&loaded.config, &loaded.config_hash);
    if let Some(output) = &cli_opts.output {
        settings.output_root = output.clone();
    }
    info!(
        "config_hash={} output_root={} buffer_kib={}",
        loaded.config_hash,
        settings.output_root.display(),
        loaded.config.copy_buffer_kib
    );

    let mut processor = ArchiveDsProcessor::new(
        PathPanel::with_path(&cli_opts.input),
        settings,
        &loaded.config.thread_name,
    )?;

    let score = processor.can_process(&cli_opts.input);
    if cli_opts.detect_only {
        if cli_opts.json {
            println!(
                "{}",
                serde_json::json!({
                    "path": cli_opts.input,
                    "data_source_type": processor.data_source_type(),
                    "confidence": score,
                })
            );
        } else {
            println!("{}\t{}", score, cli_opts.input.display());
        }
        return Ok(());
    }
    if score == 0 {
        bail!("not a supported archive: {}", cli_opts.input.display());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    let (tx, rx) = crossbeam_channel::bounded::<IngestResult>(1);
    let callback: IngestCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });

    let monitor = Arc::new(LogProgress);
    let handle = match cli_opts.device_id.as_deref() {
        Some(device_id) => processor.process(device_id, &cli_opts.input, monitor, callback)?,
        None => {
            if !processor.validate() {
                bail!("input is not a readable file: {}", cli_opts.input.display());
            }
            processor.run_configured(monitor, callback)?
        }
    };
    info!("run {} started", handle.id());

    let result = loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => break result,
            Err(RecvTimeoutError::Timeout) => {
                if interrupted.swap(false, Ordering::SeqCst) {
                    warn!("interrupt received; requesting cancellation");
                    DataSourceProcessor::cancel(&processor);
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("worker exited without a result"),
        }
    };
    processor.reset();

    if cli_opts.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for ds in &result.data_sources {
            println!(
                "{}\t{} files\t{} bytes\t{}",
                ds.device_id,
                ds.file_count,
                ds.total_bytes,
                ds.root.display()
            );
        }
        for warning in &result.warnings {
            println!("warning: {warning}");
        }
        for error in &result.errors {
            println!("error: {error}");
        }
    }

    if !result.is_success() {
        bail!("run ended with status {:?}", result.status);
    }
    info!("archive-dsp run finished");
    Ok(())
}
