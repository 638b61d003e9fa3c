use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use imgconv::logging::{init_logging, LogConfig};
use imgconv::{detect_format, ConvertOptions, Converter, DiagnosticsPolicy, FormatTag};
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "imgconv")]
#[command(version, about = "Convert images with rsvg-convert, Inkscape or ImageMagick, whichever is installed", long_about = None)]
struct Cli {
    /// Log debug output to stderr as well as the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one image file
    Convert {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        dest: PathBuf,

        /// Output format; defaults to DEST's extension
        #[arg(short, long)]
        format: Option<String>,

        /// Exact output size, e.g. 512x256
        #[arg(short, long, value_parser = parse_size, conflicts_with_all = ["max", "native"])]
        size: Option<(i64, i64)>,

        /// Longest side in pixels, aspect ratio kept
        #[arg(short, long, conflicts_with = "native")]
        max: Option<i64>,

        /// Keep the source's own size (default when no size is given)
        #[arg(long)]
        native: bool,

        /// Seconds before the converter is killed (0 = never)
        #[arg(long)]
        timeout: Option<u64>,

        /// Only fail on non-zero exit, not on converter warnings
        #[arg(long)]
        lenient: bool,
    },

    /// Print an image file's format, detected from its content
    Detect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,
    },

    /// Show known converters and whether they are installed
    Tools {
        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn parse_size(value: &str) -> Result<(i64, i64), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let w = w.trim().parse::<i64>().map_err(|e| format!("bad width '{w}': {e}"))?;
    let h = h.trim().parse::<i64>().map_err(|e| format!("bad height '{h}': {e}"))?;
    Ok((w, h))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = init_logging(
        "imgconv",
        LogConfig::default().with_level(level).with_stderr(cli.verbose),
    );

    match cli.command {
        Commands::Convert {
            source,
            dest,
            format,
            size,
            max,
            native: _,
            timeout,
            lenient,
        } => {
            let mut options = ConvertOptions::from_env();
            if let Some(secs) = timeout {
                options = options.with_timeout((secs > 0).then(|| Duration::from_secs(secs)));
            }
            if lenient {
                options = options.with_diagnostics(DiagnosticsPolicy::ExitStatus);
            }

            let format = match format {
                Some(f) => FormatTag::new(&f),
                None => format_from_extension(&dest)?,
            };

            let converter = Converter::new(options);
            let result = match (size, max) {
                (Some((w, h)), _) => converter.convert_file(&source, &dest, w, h, format.as_str()),
                (None, Some(max)) => {
                    converter.convert_file_with_aspect(&source, &dest, max, format.as_str())
                }
                (None, None) => converter.convert_file(&source, &dest, -1, -1, format.as_str()),
            };

            match result {
                Ok(()) => {
                    println!(
                        "{} {} → {} ({})",
                        style("✅").green(),
                        source.display(),
                        dest.display(),
                        format
                    );
                }
                Err(e) => {
                    eprintln!("{} {}", style("❌ Conversion failed:").red().bold(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Detect { file, output } => {
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?,
            );
            let format = detect_format(reader)?;

            if output == OutputFormat::Json {
                let result = json!({ "path": file, "format": format });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}: {}", file.display(), style(&format).cyan().bold());
            }
        }

        Commands::Tools { output } => {
            let reports = Converter::from_env().list_tools();

            if output == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    match &report.path {
                        Some(path) => println!(
                            "{} {:<14} {}",
                            style("✅").green(),
                            report.program,
                            style(path.display()).dim()
                        ),
                        None => println!(
                            "{} {:<14} {}",
                            style("❌").red(),
                            report.program,
                            style("not installed").dim()
                        ),
                    }
                    println!("   in:  {}", report.inputs.join(" "));
                    println!("   out: {}", report.outputs.join(" "));
                }
            }
        }
    }

    Ok(())
}

fn format_from_extension(dest: &Path) -> anyhow::Result<FormatTag> {
    match dest.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => Ok(FormatTag::new(ext)),
        _ => bail!(
            "Cannot infer output format from {}; pass --format",
            dest.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512x256").unwrap(), (512, 256));
        assert_eq!(parse_size("-1X-1").unwrap(), (-1, -1));
        assert!(parse_size("512").is_err());
        assert!(parse_size("ax2").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(format_from_extension(Path::new("out/icon.PNG")).unwrap(), "png");
        assert_eq!(format_from_extension(Path::new("photo.jpeg")).unwrap(), "jpg");
        assert!(format_from_extension(Path::new("noext")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["imgconv", "convert", "a.svg", "b.png", "--max", "256"]).unwrap();
        match cli.command {
            Commands::Convert { max, size, .. } => {
                assert_eq!(max, Some(256));
                assert_eq!(size, None);
            }
            _ => panic!("expected convert"),
        }

        assert!(Cli::try_parse_from([
            "imgconv", "convert", "a.svg", "b.png", "--max", "256", "--size", "10x10"
        ])
        .is_err());
    }
}
