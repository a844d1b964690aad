use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use multiget_core::cleanup::clean_dir;
use multiget_core::{DownloadConfig, Downloader, Event, EventKind, ExistBehavior};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::from(2);
    }
    match args[1].as_str() {
        "get" => cmd_get(&args[2..]),
        "clean" => cmd_clean(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            ExitCode::from(2)
        }
    }
}

fn cmd_get(args: &[String]) -> ExitCode {
    let mut url: Option<String> = None;
    let mut dest: Option<PathBuf> = None;
    let mut config = DownloadConfig::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--connections" => {
                let Some(value) = iter.next().and_then(|v| v.parse::<u32>().ok()) else {
                    eprintln!("--connections expects a positive integer");
                    return ExitCode::from(2);
                };
                config.connections = value.max(1);
            }
            "--retries" => {
                let Some(value) = iter.next().and_then(|v| v.parse::<u32>().ok()) else {
                    eprintln!("--retries expects an integer");
                    return ExitCode::from(2);
                };
                config.max_retry = value;
            }
            "--overwrite" => config.exist_behavior = ExistBehavior::Overwrite,
            "--ignore" => config.exist_behavior = ExistBehavior::Ignore,
            "--no-redirect" => config.follow_redirect = false,
            value if url.is_none() => url = Some(value.to_string()),
            value if dest.is_none() => dest = Some(PathBuf::from(value)),
            value => {
                eprintln!("unexpected argument: {}", value);
                return ExitCode::from(2);
            }
        }
    }
    let Some(url) = url else {
        print_usage();
        return ExitCode::from(2);
    };
    let dest = dest.unwrap_or_else(|| PathBuf::from("."));

    let downloader = match Downloader::with_config(url, dest, config) {
        Ok(downloader) => downloader,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(1);
        }
    };

    downloader.on(EventKind::Metadata, |event| {
        if let Event::Metadata(meta) = event {
            match meta.size {
                Some(size) => println!("{} bytes from {}", size, meta.final_address),
                None => println!("unknown size from {}", meta.final_address),
            }
            if meta.parallel {
                println!(
                    "{} chunks over ranged connections{}",
                    meta.chunks.len(),
                    if meta.is_resume { " (resuming)" } else { "" }
                );
            } else {
                println!("single connection");
            }
            println!("saving to {}", meta.saved_file_path.display());
        }
    });
    downloader.on(EventKind::Progress, |event| {
        if let Event::Progress(snapshot) = event {
            print!(
                "\r{:>6.2}%  {:>12}",
                snapshot.total.percentage,
                format_speed(snapshot.total.speed)
            );
            let _ = std::io::stdout().flush();
        }
    });
    downloader.on(EventKind::Retry, |event| {
        if let Event::Retry(info) = event {
            eprintln!(
                "\nretrying chunk #{} (attempt {}): {}",
                info.chunk_id, info.attempt, info.error
            );
        }
    });

    match downloader.wait() {
        Ok(true) => {
            println!("\ndone");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("\nclosed without completing");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("\nerror: {}", err);
            ExitCode::from(1)
        }
    }
}

fn cmd_clean(args: &[String]) -> ExitCode {
    let dir = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    match clean_dir(&dir) {
        Ok(removed) => {
            for path in &removed {
                println!("removed {}", path.display());
            }
            println!("{} chunk file(s) removed", removed.len());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(1)
        }
    }
}

fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn print_usage() {
    println!("usage:");
    println!("  multiget get <url> [dest] [--connections N] [--retries N] [--overwrite|--ignore] [--no-redirect]");
    println!("  multiget clean [dir]");
}
