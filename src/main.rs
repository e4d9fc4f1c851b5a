use anyhow::{Context, Result};
use arcjobs::models::request::{
    AesKeyStrength, Codec, CodecOptions, SevenZOptions, TarCompression, TarOptions, ZipEncryption,
    ZipLevel, ZipMethod, ZipOptions,
};
use arcjobs::utils::logging;
use arcjobs::{
    ArchiveEngine, EngineConfig, FormatOptions, JobEvent, JobKind, JobRequest, TerminalEvent,
};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::Receiver;
use tracing::{info, warn};

/// Ctrl+C로 취소된 경우의 종료 코드
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "arcjobs", version, about = "Background archive extraction and creation")]
struct Cli {
    /// Config file (defaults to $ARCJOBS_CONFIG_FILE or <config dir>/arcjobs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Archive (or first volume) to extract
    archive: PathBuf,

    /// Output directory. A sub directory named after the archive is created inside it.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Files or directories to add
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Archive name (extension is added when missing)
    #[arg(short, long)]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct ZipArgs {
    #[arg(long)]
    password: Option<String>,

    /// store, deflate, bzip2, zstd
    #[arg(long)]
    method: Option<ZipMethod>,

    /// fastest ... ultra
    #[arg(long)]
    level: Option<ZipLevel>,

    /// none, zip_standard, aes
    #[arg(long)]
    encryption: Option<ZipEncryption>,

    /// aes128, aes192, aes256
    #[arg(long)]
    key_strength: Option<AesKeyStrength>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract a zip, jar, war, 7z, rar or tar(.gz/.bz2/.xz/.zst) archive
    #[command(alias = "x")]
    Extract(ExtractArgs),

    /// Extract a split zip starting from <name>.zip.001
    ExtractZipVolumes(ExtractArgs),

    /// Extract a multi-volume 7z starting from <name>.7z.001
    #[command(name = "extract-7z-volumes")]
    Extract7zVolumes(ExtractArgs),

    /// Extract a rar archive with the configured external program
    ExtractRar(ExtractArgs),

    /// Decompress a single .gz/.bz2/.xz/.lzma/.zst/.lz4/.sz file (compressed tarballs are unpacked)
    ExtractStream(ExtractArgs),

    /// Create a zip archive
    Zip {
        #[command(flatten)]
        create: CreateArgs,
        #[command(flatten)]
        zip: ZipArgs,
    },

    /// Create a zip archive split into numbered volumes
    SplitZip {
        #[command(flatten)]
        create: CreateArgs,
        #[command(flatten)]
        zip: ZipArgs,
        /// Volume size in bytes (at least 65536)
        #[arg(long)]
        split_size: u64,
    },

    /// Create a 7z archive
    #[command(name = "7z")]
    SevenZ {
        #[command(flatten)]
        create: CreateArgs,
        #[arg(long)]
        password: Option<String>,
        /// 0-9
        #[arg(long)]
        level: Option<u32>,
        /// Compress every file separately
        #[arg(long)]
        no_solid: bool,
        #[arg(long)]
        threads: Option<u32>,
    },

    /// Create a tar archive
    Tar {
        #[command(flatten)]
        create: CreateArgs,
        /// none, gzip, bzip2, xz, zstd
        #[arg(long)]
        compression: Option<TarCompression>,
    },

    /// Compress a single file with a stream codec
    Compress {
        source: PathBuf,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// gzip, bzip2, xz, lzma, zstd, lz4, snappy
        #[arg(long)]
        codec: Option<Codec>,
        #[arg(long)]
        level: Option<u32>,
        /// xz only
        #[arg(long)]
        threads: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    }
    .context("failed to load config")?;
    logging::init(&config.log_filter);

    let Some(request) = build_request(cli.command, &config) else {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    };

    let engine = ArchiveEngine::new(config);
    let events = engine.subscribe();
    let ticket = engine.submit(request).context("failed to start job")?;
    let kind = ticket.kind();
    info!(job = ticket.id(), kind = kind.name(), "started");

    let printer = tokio::task::spawn_blocking(move || print_events(events));
    let mut waiter = tokio::task::spawn_blocking(move || ticket.wait());
    let outcome = tokio::select! {
        joined = &mut waiter => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!(kind = kind.name(), "interrupted, cancelling");
            engine.cancel(kind);
            waiter.await?
        }
    };
    printer.await?;

    Ok(match outcome {
        TerminalEvent::Completed => {
            eprintln!("{}: done", kind);
            ExitCode::SUCCESS
        }
        TerminalEvent::Cancelled => {
            eprintln!("{}: cancelled", kind);
            ExitCode::from(EXIT_CANCELLED)
        }
        TerminalEvent::Failed { category, reason } => {
            eprintln!("{}: failed [{}] {}", kind, category.name(), reason);
            ExitCode::FAILURE
        }
    })
}

/// 종료 이벤트를 받을 때까지 진행률을 한 줄에 갱신한다
fn print_events(events: Receiver<JobEvent>) {
    let mut stderr = io::stderr();
    for event in events {
        match event {
            JobEvent::Progress { kind, percent, .. } => {
                let _ = write!(stderr, "\r{}: {:>3}%", kind, percent);
                let _ = stderr.flush();
            }
            JobEvent::Terminal { .. } => {
                let _ = writeln!(stderr);
                return;
            }
        }
    }
}

/// 작업이 아닌 명령(Config)이면 None
fn build_request(command: Commands, config: &EngineConfig) -> Option<JobRequest> {
    let extract = |kind: JobKind, args: ExtractArgs| {
        let request = JobRequest::new(kind, vec![args.archive], args.output);
        match args.password {
            Some(password) => request.with_password(password),
            None => request,
        }
    };

    let request = match command {
        Commands::Extract(args) => extract(JobKind::ExtractSingle, args),
        Commands::ExtractZipVolumes(args) => extract(JobKind::ExtractMultiVolumeZip, args),
        Commands::Extract7zVolumes(args) => extract(JobKind::ExtractMultiVolume7z, args),
        Commands::ExtractRar(args) => extract(JobKind::ExtractRar, args),
        Commands::ExtractStream(args) => extract(JobKind::ExtractCodecStream, args),
        Commands::Zip { create, zip } => {
            let options = zip_options(config, &zip, None);
            create_request(JobKind::CreateZip, create, zip.password, options)
        }
        Commands::SplitZip {
            create,
            zip,
            split_size,
        } => {
            let options = zip_options(config, &zip, Some(split_size));
            create_request(JobKind::CreateSplitZip, create, zip.password, options)
        }
        Commands::SevenZ {
            create,
            password,
            level,
            no_solid,
            threads,
        } => {
            let defaults = &config.sevenz;
            let options = SevenZOptions {
                level: level.unwrap_or(defaults.level),
                solid: defaults.solid && !no_solid,
                threads: threads.or(defaults.threads),
            };
            create_request(JobKind::Create7z, create, password, FormatOptions::SevenZ(options))
        }
        Commands::Tar {
            create,
            compression,
        } => {
            let options = match compression {
                Some(compression) => FormatOptions::Tar(TarOptions { compression }),
                None => FormatOptions::Default,
            };
            create_request(JobKind::CreateTar, create, None, options)
        }
        Commands::Compress {
            source,
            output,
            codec,
            level,
            threads,
        } => {
            let options = CodecOptions {
                codec: codec.unwrap_or(config.codec.codec),
                level,
                threads,
            };
            JobRequest::new(JobKind::CompressCodecStream, vec![source], output)
                .with_options(FormatOptions::Codec(options))
        }
        Commands::Config => return None,
    };
    Some(request)
}

fn create_request(
    kind: JobKind,
    args: CreateArgs,
    password: Option<String>,
    options: FormatOptions,
) -> JobRequest {
    let mut request = JobRequest::new(kind, args.sources, args.output).with_options(options);
    if let Some(name) = args.name {
        request = request.with_archive_name(name);
    }
    if let Some(password) = password {
        request = request.with_password(password);
    }
    request
}

/// 설정값 위에 명령행 값을 덮는다. 암호화는 지정하지 않으면 비밀번호 유무로 정한다.
fn zip_options(config: &EngineConfig, args: &ZipArgs, split_size: Option<u64>) -> FormatOptions {
    let defaults = &config.zip;
    let encryption = match (args.encryption, args.password.is_some(), defaults.encryption) {
        (Some(encryption), _, _) => encryption,
        (None, false, _) => ZipEncryption::None,
        (None, true, ZipEncryption::None) => ZipEncryption::Aes,
        (None, true, configured) => configured,
    };
    FormatOptions::Zip(ZipOptions {
        method: args.method.unwrap_or(defaults.method),
        level: args.level.unwrap_or(defaults.level),
        encryption,
        key_strength: args.key_strength.unwrap_or(defaults.key_strength),
        split_size,
    })
}
