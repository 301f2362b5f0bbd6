use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logalign::{cli, pipeline, read_corpus, Engine};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    init_tracing();
    let args = cli::parse_args();

    let corpus = match read_corpus(&args.corpus_dir) {
        Ok(corpus) => corpus,
        Err(err) => {
            eprintln!("error reading corpus: {err}");
            std::process::exit(1);
        }
    };

    let engine = match Engine::new(args.config, &corpus, &args.cache_dir) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("error building match engine: {err}");
            std::process::exit(1);
        }
    };

    let reader: Box<dyn BufRead + Send> = match &args.input {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(err) => {
                eprintln!("error opening {}: {err}", path.display());
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let stdout = io::stdout();
    let mut output = io::BufWriter::new(stdout.lock());
    let result = pipeline::run(&engine, reader, &mut output, pipeline::DEFAULT_WORKERS)
        .and_then(|_| output.flush());
    if let Err(err) = result {
        eprintln!("error writing output: {err}");
        std::process::exit(1);
    }
}
