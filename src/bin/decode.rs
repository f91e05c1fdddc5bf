//! Thin command-line front end for the decoder.
//!
//! Loads a binary acoustic model and a dictionary, builds a word-list
//! or N-gram model set and recognises WAV / raw PCM / HTK feature
//! inputs, printing results as text or JSON lines.
//!
//! Usage:
//!   ardea-decode -h MODEL.bam -v DICT [options] [-json] INPUT...

use anyhow::{Context, bail};
use ardea::adin::file::{RawFileSource, WavFileSource};
use ardea::am::binhmm;
use ardea::config::DecoderConfig;
use ardea::dict::WordLexicon;
use ardea::events::NullSink;
use ardea::htkparam::FeatureSeq;
use ardea::lm::ngram::{NgramLm, NgramModel};
use ardea::model::Model;
use ardea::result::UtteranceResult;
use ardea::engine::Recog;
use std::path::PathBuf;
use std::process::ExitCode;

struct Cli {
    hmm_path: Option<PathBuf>,
    dict_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    json: bool,
    word_list: bool,
    engine_args: Vec<String>,
}

fn parse_cli() -> anyhow::Result<Cli> {
    let mut cli = Cli {
        hmm_path: None,
        dict_path: None,
        config_path: None,
        inputs: Vec::new(),
        json: false,
        word_list: false,
        engine_args: Vec::new(),
    };
    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => cli.hmm_path = Some(PathBuf::from(args.next().context("-h needs a file")?)),
            "-v" => cli.dict_path = Some(PathBuf::from(args.next().context("-v needs a file")?)),
            "-C" => {
                cli.config_path = Some(PathBuf::from(args.next().context("-C needs a file")?));
            }
            "-json" => cli.json = true,
            "-w" => cli.word_list = true,
            "-help" | "--help" => {
                eprintln!(
                    "usage: ardea-decode -h MODEL.bam -v DICT [-C CONF] [-w] [-json] \
                     [engine options] INPUT..."
                );
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                // Engine option: keep it (and a value if one follows).
                cli.engine_args.push(other.to_owned());
                if let Some(next) = args.peek() {
                    if !next.starts_with('-') && !is_input_file(next) {
                        cli.engine_args.push(args.next().unwrap_or_default());
                    }
                }
            }
            other => cli.inputs.push(PathBuf::from(other)),
        }
    }
    Ok(cli)
}

fn is_input_file(name: &str) -> bool {
    name.ends_with(".wav") || name.ends_with(".raw") || name.ends_with(".mfc")
}

fn print_result(result: &UtteranceResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }
    println!("status: {}", result.status.code());
    for (i, sent) in result.sentences.iter().enumerate() {
        println!(
            "sentence{}: {}  (score {:.2})",
            i + 1,
            sent.outputs.join(" "),
            sent.score
        );
        if !sent.confidence.is_empty() {
            let cm: Vec<String> = sent.confidence.iter().map(|c| format!("{c:.3}")).collect();
            println!("cmscore{}: {}", i + 1, cm.join(" "));
        }
    }
    Ok(())
}

fn run() -> anyhow::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_cli()?;
    let mut config = match &cli.config_path {
        Some(path) => DecoderConfig::load(path)?,
        None => DecoderConfig::default(),
    };
    config.apply_args(cli.engine_args.iter())?;

    let Some(hmm_path) = &cli.hmm_path else {
        bail!("no acoustic model given (-h)");
    };
    let (am, para) = binhmm::load(hmm_path)?;
    if let Some(para) = para {
        para.apply_to(&mut config.analysis);
    }

    let model = if !config.lm.gram_prefixes.is_empty() {
        // Each prefix contributes one word-list grammar from PREFIX.dict.
        let mut model = Model::word_list(am);
        for prefix in config.lm.gram_prefixes.clone() {
            let dict_path = PathBuf::from(format!("{prefix}.dict"));
            let words = WordLexicon::load(&dict_path, Some(&model.am))?;
            model.add_grammar(&prefix, None, words);
        }
        model
    } else {
        let Some(dict_path) = &cli.dict_path else {
            bail!("no dictionary given (-v)");
        };
        let dict = WordLexicon::load(dict_path, Some(&am))?;
        if cli.word_list {
            let mut model = Model::word_list(am);
            model.add_grammar("wordlist", None, dict);
            model
        } else {
            // Without an external LM, fall back to a uniform unigram.
            let lm = NgramLm::from_forward(NgramModel::uniform(dict.len()));
            Model::ngram(
                am,
                dict,
                lm,
                &config.lm.head_silname,
                &config.lm.tail_silname,
                &config.am.spmodel_name,
            )?
        }
    };

    let mut engine = Recog::new(model, config, NullSink)?;
    let mut worst = 0i32;

    for input in &cli.inputs {
        let results = match input.extension().and_then(|e| e.to_str()) {
            Some("wav") => {
                let mut src = WavFileSource::new(input.clone());
                engine.run_on_source(&mut src)?
            }
            Some("mfc") | Some("htk") => {
                let seq = FeatureSeq::load(input)?;
                engine.run_on_features(&seq)?
            }
            _ => {
                let mut src = RawFileSource::new(input.clone());
                engine.run_on_source(&mut src)?
            }
        };
        for result in &results {
            print_result(result, cli.json)?;
            worst = worst.min(result.status.code());
        }
    }
    // Per-utterance failures do not fail the process.
    let _ = worst;
    Ok(0)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(0)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
