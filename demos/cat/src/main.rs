use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use sluice::{
    CacheOptions, CachedStream, EnableStatus, FileStream, FileStreamOptions, InterruptFlag,
    WorkerKind,
};

const USAGE: &str = "\
usage: cat [options] FILE

Copies FILE to stdout through a read-ahead cache.

options:
  --cache-kib N        cache size in KiB (default 8192)
  --prefill-kib N      bytes to buffer before starting, in KiB
  --seek-limit-kib N   read forward through gaps up to this size, in KiB
  --seek BYTES         start copying at this offset
  --process            run the cache worker in a child process
  --discard            read everything but write nothing
";

/// Log the cache state every this many bytes.
const STATS_EVERY: u64 = 16 * 1024 * 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        eprint!("{}", USAGE);
        return Ok(());
    }

    let cache_kib: u64 = args.opt_value_from_str("--cache-kib")?.unwrap_or(8192);
    let mut opts = CacheOptions::from_kib(cache_kib);
    if let Some(kib) = args.opt_value_from_str::<_, u64>("--prefill-kib")? {
        opts.min_prefill = kib.saturating_mul(1024);
    }
    if let Some(kib) = args.opt_value_from_str::<_, u64>("--seek-limit-kib")? {
        opts.seek_limit = kib.saturating_mul(1024);
    }
    if args.contains("--process") {
        opts.worker = WorkerKind::Process;
    }
    let seek: Option<u64> = args.opt_value_from_str("--seek")?;
    let discard = args.contains("--discard");

    let path = match args.finish().into_iter().next() {
        Some(path) => path,
        None => {
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let file = FileStream::open(&path, FileStreamOptions::default())?;
    let mut stream = CachedStream::new(file);

    let interrupt = InterruptFlag::new();
    stream.set_interrupt(Arc::new(interrupt.clone()));

    let start = Instant::now();
    match stream.enable_cache(opts) {
        Ok(EnableStatus::Enabled) => {
            log::info!("Cache enabled after {:?}", start.elapsed());
        }
        Ok(EnableStatus::Interrupted) => log::warn!("Prefill interrupted, reading uncached"),
        Err(e) => log::warn!("Reading uncached: {}", e),
    }

    if let Some(pos) = seek {
        if !stream.seek(pos) {
            return Err(format!("Failed to seek to {}", pos).into());
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    let mut next_stats = STATS_EVERY;

    loop {
        let len = stream.read(&mut buf);
        if len == 0 {
            break;
        }

        if !discard {
            if let Err(e) = out.write_all(&buf[..len]) {
                // A closed pipe ends the copy, like any other cat.
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    interrupt.raise();
                    break;
                }
                return Err(e.into());
            }
        }

        total += len as u64;
        if total >= next_stats {
            next_stats += STATS_EVERY;
            if let Some(stats) = stream.cache_stats() {
                log::info!(
                    "{} MiB copied, cache {}/{} KiB filled{}",
                    total / (1024 * 1024),
                    stats.fill / 1024,
                    stats.size / 1024,
                    if stats.idle { ", idle" } else { "" }
                );
            }
        }
    }

    out.flush()?;

    let elapsed = start.elapsed();
    log::info!(
        "Copied {} bytes in {:?} ({:.1} MiB/s)",
        total,
        elapsed,
        total as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(1e-9)
    );

    stream.disable_cache();

    Ok(())
}
