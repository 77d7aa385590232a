use clap::Parser;
use finrag_context::text::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_TEXT_DELIMITERS, TextSplitter,
    build_context_prefix,
};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// A CLI tool to preview how a document is split into child passages.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum window length in characters.
    #[arg(short = 's', long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by consecutive windows.
    #[arg(short = 'o', long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Comma-separated list of regex patterns for delimiters.
    /// Defaults to paragraph, line and word breaks.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,

    /// Optional summary used to render the context prefix of each passage.
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Serialize)]
struct PassageOutput<'a> {
    sequence: usize,
    char_start: usize,
    char_end: usize,
    text: &'a str,
    contextualized: String,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let delimiter_patterns_owned: Vec<String> = match args.delimiters {
        Some(d) => d,
        None => DEFAULT_TEXT_DELIMITERS
            .iter()
            .map(|&s| s.to_string())
            .collect(),
    };
    let delimiter_patterns_refs: Vec<&str> = delimiter_patterns_owned
        .iter()
        .map(|s| s.as_str())
        .collect();

    let splitter = TextSplitter::new(
        &delimiter_patterns_refs,
        args.chunk_size,
        args.chunk_overlap,
    )
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let file_name = args
        .input
        .as_deref()
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "stdin".to_string());
    let prefix = args
        .summary
        .as_deref()
        .and_then(|summary| build_context_prefix(&file_name, summary, 200));

    let windows = splitter.split(&file_content);
    let passages: Vec<PassageOutput> = windows
        .iter()
        .map(|w| PassageOutput {
            sequence: w.sequence,
            char_start: w.char_start,
            char_end: w.char_end,
            text: &w.text,
            contextualized: w.contextualized(prefix.as_deref()),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&passages)?;
    println!("{json_output}");

    Ok(())
}
