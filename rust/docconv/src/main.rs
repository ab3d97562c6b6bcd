use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docconv_core::{convert, ConvertConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert between DOCX, HTML and Markdown")]
struct Cli {
    /// TOML file overriding the default conversion settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Keep image references as package paths instead of data URIs.
    #[arg(long, global = true)]
    no_embed_images: bool,

    /// Write tables into generated DOCX files instead of dropping them.
    #[arg(long, global = true)]
    keep_tables: bool,

    /// Keep h4-h6 headings as separate paragraphs.
    #[arg(long, global = true)]
    no_merge_headings: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Io {
    input: PathBuf,
    output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// DOCX -> HTML with images inlined.
    Docx2html(Io),
    /// DOCX -> Markdown; images and tables stay as raw HTML.
    Docx2md(Io),
    /// Markdown -> DOCX.
    Md2docx(Io),
    /// Markdown -> standalone HTML page.
    Md2html(Io),
    /// HTML -> Markdown.
    Html2md(Io),
    /// HTML -> DOCX.
    Html2docx(Io),
    /// Pick the conversion from the file extensions.
    Convert(Io),
}

impl Command {
    fn io(&self) -> &Io {
        match self {
            Self::Docx2html(io)
            | Self::Docx2md(io)
            | Self::Md2docx(io)
            | Self::Md2html(io)
            | Self::Html2md(io)
            | Self::Html2docx(io)
            | Self::Convert(io) => io,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ConvertConfig> {
    let mut config = match &cli.config {
        Some(path) => ConvertConfig::load(path).with_context(|| format!("load config {}", path.display()))?,
        None => ConvertConfig::default(),
    };
    if cli.no_embed_images {
        config.embed_images = false;
    }
    if cli.keep_tables {
        config.keep_tables_in_docx = true;
    }
    if cli.no_merge_headings {
        config.merge_small_headings = false;
    }
    Ok(config)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    let io = cli.command.io();
    let input = absolute(&io.input);
    let output = absolute(&io.output);
    tracing::info!(input = %input.display(), output = %output.display(), "converting");

    let (i, o) = (input.as_path(), output.as_path());
    let result = match &cli.command {
        Command::Docx2html(_) => convert::docx_to_html(i, o, &config),
        Command::Docx2md(_) => convert::docx_to_markdown(i, o, &config),
        Command::Md2docx(_) => convert::markdown_to_docx(i, o, &config),
        Command::Md2html(_) => convert::markdown_to_html_file(i, o),
        Command::Html2md(_) => convert::html_to_markdown_file(i, o),
        Command::Html2docx(_) => convert::html_to_docx(i, o, &config),
        Command::Convert(_) => convert::convert(i, o, &config),
    };
    result.with_context(|| format!("convert {} -> {}", input.display(), output.display()))?;

    println!("Converted: {} -> {}", input.display(), output.display());
    Ok(())
}
