//! Engine-level tests: construction, matching, scoring, and rendering.

use tempfile::TempDir;

use super::*;
use crate::config::ViewConfig;
use crate::corpus::{Corpus, CorpusFile, LogCall, LogCallDefinition};

fn definition(id: &str, link_template: &str) -> LogCallDefinition {
    LogCallDefinition {
        id: id.to_string(),
        syntax: "printflike".to_string(),
        link_template: link_template.to_string(),
    }
}

fn log_call(file: &str, line: u32, def: &str, format: &str, args: &[&str]) -> LogCall {
    LogCall {
        file: file.to_string(),
        line,
        definition_id: def.to_string(),
        format_string: format.to_string(),
        argument_exprs: args.iter().map(|a| a.to_string()).collect(),
    }
}

fn corpus_of(project: &str, definitions: Vec<LogCallDefinition>, calls: Vec<LogCall>) -> Corpus {
    let mut corpus = Corpus::new();
    corpus.insert(
        project.to_string(),
        CorpusFile {
            project: project.to_string(),
            definitions,
            calls,
        },
    );
    corpus
}

fn demo_corpus(calls: Vec<LogCall>) -> Corpus {
    corpus_of("demo", vec![definition("printk", "x/{file}#{line}")], calls)
}

fn engine_with(config: ViewConfig, corpus: &Corpus) -> (Engine, TempDir) {
    colored::control::set_override(false);
    let cache = tempfile::tempdir().expect("cache dir");
    let engine = Engine::new(config, corpus, cache.path()).expect("engine builds");
    (engine, cache)
}

fn process(engine: &Engine, line: &str) -> String {
    let mut scratch = engine.alloc_scratch().expect("scratch");
    let out = engine
        .process_line(line.as_bytes(), &mut scratch)
        .expect("line processes");
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn seed_user_login_annotation() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        10,
        "printk",
        "user %s logged in from %s",
        &["u.name", "ip"],
    )]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let out = process(&engine, "user alice logged in from 10.0.0.1");
    assert!(out.contains("a.c:10"), "reference column text: {out:?}");
    assert!(
        out.contains("\x1b]8;;x/a.c#10\x1b\\"),
        "hyperlink target: {out:?}"
    );
    assert!(
        out.contains("user |u.name|alice logged in from |ip|10.0.0.1"),
        "annotated body: {out:?}"
    );
}

#[test]
fn seed_fd_bytes_matches_with_defaults() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        3,
        "printk",
        "fd=%d bytes=%d",
        &["fd", "n"],
    )]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let out = process(&engine, "fd=7 bytes=1024");
    assert!(out.contains("fd=|fd|7 bytes=|n|1024"), "got {out:?}");
    assert!(out.contains("a.c:3"));
}

#[test]
fn seed_bare_number_fails_literal_floor() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "%d", &["n"])]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let out = process(&engine, "42");
    assert_eq!(out, format!("{}42", render::blank_ref_column(40)));
}

#[test]
fn seed_tie_break_prefers_more_word_literals() {
    let corpus = demo_corpus(vec![
        log_call("a.c", 1, "printk", "err %s", &["msg"]),
        log_call("a.c", 2, "printk", "err %d bytes=%d", &["code", "n"]),
    ]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let out = process(&engine, "err 5 bytes=9");
    assert!(out.contains("err |code|5 bytes=|n|9"), "got {out:?}");
    assert!(!out.contains("|msg|"));
    assert!(out.contains("a.c:2"));

    // Alone, the weaker call site still matches; the tie-break chose, not
    // the absence of competition.
    let weak = demo_corpus(vec![log_call("a.c", 1, "printk", "err %s", &["msg"])]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &weak);
    let out = process(&engine, "err 5 bytes=9");
    assert!(out.contains("err |msg|5 bytes=9"), "got {out:?}");
}

#[test]
fn seed_start_char_pos_skips_timestamp() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        2,
        "printk",
        "err %d bytes=%d",
        &["code", "n"],
    )]);
    let config = ViewConfig {
        start_char_pos: " 2".to_string(),
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    let out = process(&engine, "2024-01-01 12:00:00 err 5 bytes=9");
    assert!(
        out.contains("2024-01-01 12:00:00 err |code|5 bytes=|n|9"),
        "prefix must be preserved and the body annotated: {out:?}"
    );
}

#[test]
fn start_char_with_too_few_occurrences_lands_on_last_byte() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d", &["fd"])]);
    let config = ViewConfig {
        start_char_pos: "|3".to_string(),
        source_column_width: 0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    // Only one '|' present: matching starts at the last byte, so the line
    // passes through unannotated.
    assert_eq!(process(&engine, "a|b"), "a|b");
    assert_eq!(process(&engine, ""), "");
}

#[test]
fn start_pos_strips_fixed_prefix() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d bytes=%d", &["fd", "n"])]);
    let config = ViewConfig {
        start_pos: 7,
        source_column_width: 0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    let out = process(&engine, "[123] fd=7 bytes=1024");
    assert_eq!(out, "[123] fd=|fd|7 bytes=|n|1024");
}

#[test]
fn zero_width_pattern_is_dead_but_harmless() {
    let corpus = demo_corpus(vec![
        log_call("a.c", 1, "printk", "", &[]),
        log_call("a.c", 2, "printk", "fd=%d bytes=%d", &["fd", "n"]),
    ]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    // The empty-format call site never enrolls a prefilter pattern.
    assert_eq!(engine.id_to_call.len(), 1);
    // Its confirm regex is kept as a dead entry.
    assert_eq!(engine.confirm.len(), 2);

    let out = process(&engine, "fd=7 bytes=1024");
    assert!(out.contains("fd=|fd|7"), "real call site still wins: {out:?}");
    let out = process(&engine, "random text here");
    assert_eq!(out, format!("{}random text here", render::blank_ref_column(40)));
}

#[test]
fn prefilter_dominates_confirm_matches() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        2,
        "printk",
        "fd=%d bytes=%d",
        &["fd", "n"],
    )]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let body = b"fd=7 bytes=1024";
    let mut scratch = engine.alloc_scratch().unwrap();
    let candidates = engine.collect_candidates(body, &mut scratch);
    assert!(
        candidates.keys().any(|&(id, _)| id == 1),
        "prefilter must propose the call site the confirm regex accepts"
    );
    for (&(_, from), &to) in &candidates {
        assert!((to - from) as usize <= body.len());
    }
}

#[test]
fn skip_print_argument_expr_passes_body_through() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        2,
        "printk",
        "fd=%d bytes=%d",
        &["fd", "n"],
    )]);
    let config = ViewConfig {
        skip_print_argument_expr: true,
        source_column_width: 0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    // Matched or not, the body byte-equals the input when annotations are
    // skipped and the column is disabled.
    assert_eq!(process(&engine, "fd=7 bytes=1024"), "fd=7 bytes=1024");
    assert_eq!(process(&engine, "no match here"), "no match here");
}

#[test]
fn reference_column_is_fixed_width() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        2,
        "printk",
        "fd=%d bytes=%d",
        &["fd", "n"],
    )]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let unmatched = process(&engine, "no match here");
    assert_eq!(unmatched.len(), 40 + "no match here".len());

    let matched = process(&engine, "fd=7 bytes=1024");
    let text = matched
        .strip_prefix("\x1b]8;;x/a.c#2\x1b\\")
        .and_then(|rest| rest.split_once("\x1b]8;;\x1b\\"))
        .map(|(column, _)| column)
        .expect("matched line carries a hyperlinked column");
    assert_eq!(text.len(), 40);
}

#[test]
fn ratio_floor_disqualifies_short_matches() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "count=%d", &["c"])]);
    let config = ViewConfig {
        source_column_width: 0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    // The match covers 7 of 37 bytes, under the default 0.3 ratio.
    let line = format!("{}count=7", "z".repeat(30));
    assert_eq!(process(&engine, &line), line);

    // With the ratio floor lifted the same line matches.
    let config = ViewConfig {
        source_column_width: 0,
        min_matched_ratio: 0.0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);
    let out = process(&engine, &line);
    assert!(out.contains("count=|c|7"), "got {out:?}");
}

#[test]
fn project_filter_limits_matching() {
    let mut corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d bytes=%d", &["fd", "n"])]);
    corpus.insert(
        "other".to_string(),
        CorpusFile {
            project: "other".to_string(),
            definitions: vec![definition("logf", "y/{file}:{line}")],
            calls: vec![log_call("b.c", 5, "logf", "conn from %s closed", &["peer"])],
        },
    );

    let config = ViewConfig {
        project_filter: vec!["demo".to_string()],
        source_column_width: 0,
        ..ViewConfig::default()
    };
    let (engine, _cache) = engine_with(config, &corpus);

    assert!(process(&engine, "fd=7 bytes=1024").contains("|fd|"));
    // The filtered-out project's call sites are invisible.
    let line = "conn from 10.0.0.9 closed";
    assert_eq!(process(&engine, line), line);
}

#[test]
fn multiple_projects_compete() {
    let mut corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "open %s", &["path"])]);
    corpus.insert(
        "other".to_string(),
        CorpusFile {
            project: "other".to_string(),
            definitions: vec![definition("logf", "y/{file}:{line}")],
            calls: vec![log_call(
                "b.c",
                5,
                "logf",
                "open %s flags=%d",
                &["name", "flags"],
            )],
        },
    );
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let out = process(&engine, "open /etc/hosts flags=2");
    assert!(out.contains("|name|"), "richer call site wins: {out:?}");
    assert!(out.contains("b.c:5"));
}

#[test]
fn pipeline_output_equals_sequential_processing() {
    let corpus = demo_corpus(vec![
        log_call("a.c", 1, "printk", "fd=%d bytes=%d", &["fd", "n"]),
        log_call("a.c", 2, "printk", "user %s logged in from %s", &["u.name", "ip"]),
    ]);
    let (engine, _cache) = engine_with(ViewConfig::default(), &corpus);

    let mut input = String::new();
    for i in 0..1000 {
        match i % 3 {
            0 => input.push_str(&format!("fd={i} bytes={}\n", i * 7)),
            1 => input.push_str(&format!("user u{i} logged in from 10.0.0.{}\n", i % 256)),
            _ => input.push_str(&format!("unmatched noise {i}\n")),
        }
    }

    let mut out = Vec::new();
    let emitted = crate::pipeline::run(
        &engine,
        std::io::Cursor::new(input.clone()),
        &mut out,
        crate::pipeline::DEFAULT_WORKERS,
    )
    .unwrap();
    assert_eq!(emitted, 1000);

    let mut expected = Vec::new();
    for line in input.lines() {
        expected.extend_from_slice(&process(&engine, line).into_bytes());
        expected.push(b'\n');
    }
    assert_eq!(out, expected, "parallel output must equal sequential output");
}

#[test]
fn duplicate_definition_ids_are_rejected() {
    let corpus = corpus_of(
        "demo",
        vec![definition("printk", "x"), definition("printk", "y")],
        vec![],
    );
    let err = Engine::new(
        ViewConfig::default(),
        &corpus,
        tempfile::tempdir().unwrap().path(),
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::DuplicateDefinition { .. }), "{err}");
}

#[test]
fn unknown_definition_id_is_rejected() {
    let corpus = corpus_of(
        "demo",
        vec![definition("printk", "x")],
        vec![log_call("a.c", 1, "absent", "fd=%d", &["fd"])],
    );
    let err = Engine::new(
        ViewConfig::default(),
        &corpus,
        tempfile::tempdir().unwrap().path(),
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::UnknownDefinition { .. }), "{err}");
}

#[test]
fn non_printflike_syntax_is_rejected() {
    let mut def = definition("tmpl", "x");
    def.syntax = "template".to_string();
    let corpus = corpus_of(
        "demo",
        vec![def],
        vec![log_call("a.c", 1, "tmpl", "fd=%d", &["fd"])],
    );
    let err = Engine::new(
        ViewConfig::default(),
        &corpus,
        tempfile::tempdir().unwrap().path(),
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::UnsupportedSyntax { .. }), "{err}");
}

#[test]
fn argument_count_mismatch_is_rejected() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d", &["fd", "extra"])]);
    let err = Engine::new(
        ViewConfig::default(),
        &corpus,
        tempfile::tempdir().unwrap().path(),
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::ArgumentCountMismatch { .. }), "{err}");
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d", &["fd"])]);
    let config = ViewConfig {
        start_pos: 4,
        start_char_pos: " 1".to_string(),
        ..ViewConfig::default()
    };
    let err = Engine::new(config, &corpus, tempfile::tempdir().unwrap().path()).unwrap_err();
    assert!(matches!(err, BuildError::Config(_)), "{err}");
}

#[test]
fn second_construction_hits_the_cache() {
    let corpus = demo_corpus(vec![log_call(
        "a.c",
        2,
        "printk",
        "fd=%d bytes=%d",
        &["fd", "n"],
    )]);
    let cache = tempfile::tempdir().unwrap();

    let first = Engine::new(ViewConfig::default(), &corpus, cache.path()).unwrap();
    let cached_files: Vec<_> = std::fs::read_dir(cache.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "hsdb"))
        .collect();
    assert_eq!(cached_files.len(), 1);

    let second = Engine::new(ViewConfig::default(), &corpus, cache.path()).unwrap();
    let line = "fd=7 bytes=1024";
    assert_eq!(process(&first, line), process(&second, line));
}

#[test]
fn corrupt_cache_is_a_construction_error() {
    let corpus = demo_corpus(vec![log_call("a.c", 1, "printk", "fd=%d bytes=%d", &["fd", "n"])]);
    let cache = tempfile::tempdir().unwrap();
    Engine::new(ViewConfig::default(), &corpus, cache.path()).unwrap();

    for entry in std::fs::read_dir(cache.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "hsdb") {
            std::fs::write(&path, b"corrupted").unwrap();
        }
    }

    let err = Engine::new(ViewConfig::default(), &corpus, cache.path()).unwrap_err();
    assert!(
        matches!(err, BuildError::Cache(CacheError::Corrupt { .. })),
        "{err}"
    );
}
