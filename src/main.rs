use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use voicecall::app::{load_registry, run_call_command};
use voicecall::audio::capture::{Direction, list_devices, suppress_audio_warnings};
use voicecall::character::{CharacterRegistry, GeminiVoice, validate_voice_assignments};
use voicecall::cli::{Cli, Commands, ConfigAction};
use voicecall::config::Config;
use voicecall::diagnostics::run_system_check;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Call {
            character,
            max_duration,
            input_wav,
            device,
            language,
        } => {
            suppress_audio_warnings();
            let config = load_config(cli.config.as_deref())?;
            run_call_command(
                config,
                character,
                max_duration,
                input_wav,
                device,
                language,
                cli.quiet,
            )
            .await?;
        }
        Commands::Voices => list_voices(),
        Commands::Characters => {
            let config = load_config(cli.config.as_deref())?;
            list_characters(&config)?;
        }
        Commands::Devices => {
            suppress_audio_warnings();
            list_audio_devices()?;
        }
        Commands::Check => {
            suppress_audio_warnings();
            let config = load_config(cli.config.as_deref())?;
            let report = run_system_check(&config).await;
            report.print();
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voicecall",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the log subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "warn,voicecall=debug",
        (false, _) => "warn,voicecall=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/voicecall/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn list_voices() {
    println!("Available voices:");
    for voice in GeminiVoice::ALL {
        println!(
            "  {:<14} {:<12} {}",
            voice.name(),
            voice.style(),
            format!("{} pitch", voice.pitch()).dimmed()
        );
    }
}

fn list_characters(config: &Config) -> Result<()> {
    let registry = load_registry(config)?;
    println!("Characters (language: {}):", registry.language_code().green());
    for character in registry.characters() {
        println!(
            "  [{}] {:<20} {}",
            character.id,
            character.name,
            character.voice().name().dimmed()
        );
    }

    for issue in validate_voice_assignments(&registry) {
        eprintln!("{}", format!("warning: {}", issue).yellow());
    }
    Ok(())
}

fn list_audio_devices() -> Result<()> {
    let inputs = list_devices(Direction::Input)?;
    let outputs = list_devices(Direction::Output)?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("Input devices:");
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("Output devices:");
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    Ok(())
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            println!("{}", config.to_display_toml()?);
        }
        ConfigAction::Dump => {
            print!("{}", Config::dump_template());
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(std::path::Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("{}", "(file does not exist, defaults are in use)".dimmed());
            }
        }
    }
    Ok(())
}
