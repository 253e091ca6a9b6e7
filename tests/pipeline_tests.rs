//! End-to-end pipeline tests using scripted stand-in compilers.
//!
//! Each "compiler" is a small shell script that understands the two
//! invocation shapes the oracle uses: `-S -o <asm>` (emit a fixed number
//! of assembly lines) and `-fsanitize=... -o <bin>` (emit a runnable
//! stub binary). This exercises corpus loading, the worker pool, triage,
//! the sanitizer gate, minimization, and the report/checkpoint sinks
//! without needing a real toolchain.

#![cfg(unix)]

use bloat_common::config::FuzzConfig;
use bloat_core::analytics::Analytics;
use bloat_core::checkpoint::CheckpointStore;
use bloat_core::corpus::load_corpus;
use bloat_core::oracle::Oracle;
use bloat_core::report::ReportWriter;
use bloat_core::search::{CancelToken, Controller};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn compiler_script(asm_behavior: &str, sanitize_behavior: &str) -> String {
    format!(
        "#!/bin/sh\n\
         out=\"\"\n\
         asm=0\n\
         prev=\"\"\n\
         for a in \"$@\"; do\n\
         \x20 [ \"$a\" = \"-S\" ] && asm=1\n\
         \x20 [ \"$prev\" = \"-o\" ] && out=\"$a\"\n\
         \x20 prev=\"$a\"\n\
         done\n\
         if [ \"$asm\" = \"1\" ]; then\n\
         {asm_behavior}\n\
         else\n\
         {sanitize_behavior}\n\
         fi\n"
    )
}

fn emit_asm(lines: usize) -> String {
    format!(
        "  echo 'main:' > \"$out\"\n\
         \x20 i=1\n\
         \x20 while [ \"$i\" -lt {lines} ]; do printf '\\tnop\\n' >> \"$out\"; i=$((i+1)); done"
    )
}

fn emit_clean_binary() -> String {
    "  printf '#!/bin/sh\\nexit 0\\n' > \"$out\"\n  chmod +x \"$out\"".to_string()
}

fn emit_noisy_binary() -> String {
    "  printf '#!/bin/sh\\necho runtime error >&2\\nexit 1\\n' > \"$out\"\n  chmod +x \"$out\""
        .to_string()
}

fn install(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

fn write_seed(corpus: &Path) {
    fs::create_dir_all(corpus).unwrap();
    fs::write(
        corpus.join("seed.c"),
        "int a = 2, b = 3;\nint main() { return a + b; }\n",
    )
    .unwrap();
}

fn test_config(corpus: &Path, output: &Path) -> FuzzConfig {
    FuzzConfig {
        corpus_dir: corpus.to_path_buf(),
        output_dir: output.to_path_buf(),
        accept_threshold: 1,
        jobs: 2,
        random_rounds: 2,
        escalation_tries: 1,
        ..FuzzConfig::default()
    }
}

#[test]
fn test_full_pipeline_accepts_regression() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    let output = dir.path().join("out");
    write_seed(&corpus);

    // The current compiler bloats to 40 lines where the old one managed 10.
    let current = install(
        dir.path(),
        "cc-new",
        &compiler_script(&emit_asm(40), &emit_clean_binary()),
    );
    let old = install(
        dir.path(),
        "cc-old",
        &compiler_script(&emit_asm(10), &emit_clean_binary()),
    );

    let config = test_config(&corpus, &output);
    let templates = load_corpus(&config.corpus_dir, config.max_source_lines).unwrap();
    assert_eq!(templates.len(), 1);

    let oracle = Oracle::new(&current, &[old.clone()], &config).unwrap();
    let checkpoint = CheckpointStore::new(output.join("checkpoint.json"));
    let mut controller = Controller::new(Arc::new(oracle), config.clone(), CancelToken::new())
        .with_analytics(Analytics::new(&output))
        .with_reporter(ReportWriter::new(output.join("reports"), &current))
        .with_checkpoint(checkpoint.clone())
        .with_rng_seed(11);

    let outcome = controller.run(templates);

    assert!(!outcome.cancelled);
    assert_eq!(outcome.accepted.len(), 1);
    let accepted = &outcome.accepted[0];
    assert!(accepted.asan_checked);
    let entry = accepted.max_ratio.as_ref().unwrap();
    assert!((entry.ratio - 4.0).abs() < f64::EPSILON);
    assert_eq!(entry.compiler, old);

    // Report and checkpoint landed on disk.
    let reports: Vec<_> = fs::read_dir(output.join("reports"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(reports.iter().any(|name| name.ends_with(".c")));
    assert!(reports.iter().any(|name| name.ends_with(".diff")));
    assert_eq!(checkpoint.load().unwrap().len(), 1);
}

#[test]
fn test_diagnostic_compiler_is_excluded_from_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    let output = dir.path().join("out");
    write_seed(&corpus);

    let current = install(
        dir.path(),
        "cc-new",
        &compiler_script(&emit_asm(40), &emit_clean_binary()),
    );
    // The only older compiler always errors: no denominator, nothing is
    // ever interesting, and the candidate retires once its strategy
    // budgets run out.
    let old = install(
        dir.path(),
        "cc-old",
        "#!/bin/sh\necho 'internal compiler error' >&2\nexit 1\n",
    );

    let config = test_config(&corpus, &output);
    let templates = load_corpus(&config.corpus_dir, config.max_source_lines).unwrap();
    let oracle = Oracle::new(&current, &[old], &config).unwrap();
    let mut controller =
        Controller::new(Arc::new(oracle), config, CancelToken::new()).with_rng_seed(11);

    let outcome = controller.run(templates);
    assert!(outcome.accepted.is_empty());

    // The failing compile was persisted for offline triage.
    let triage: Vec<_> = fs::read_dir(output.join("triage"))
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert!(!triage.is_empty());
}

#[test]
fn test_unsafe_candidate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    let output = dir.path().join("out");
    write_seed(&corpus);

    // Interesting ratio, but the instrumented binary reports a runtime
    // diagnostic: undefined behavior, not a codegen regression.
    let current = install(
        dir.path(),
        "cc-new",
        &compiler_script(&emit_asm(40), &emit_noisy_binary()),
    );
    let old = install(
        dir.path(),
        "cc-old",
        &compiler_script(&emit_asm(10), &emit_clean_binary()),
    );

    let config = test_config(&corpus, &output);
    let templates = load_corpus(&config.corpus_dir, config.max_source_lines).unwrap();
    let oracle = Oracle::new(&current, &[old], &config).unwrap();
    let mut controller =
        Controller::new(Arc::new(oracle), config, CancelToken::new()).with_rng_seed(11);

    let outcome = controller.run(templates);
    assert!(outcome.accepted.is_empty());
}

#[test]
fn test_timed_out_compiler_is_excluded_from_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    let output = dir.path().join("out");
    write_seed(&corpus);

    let current = install(
        dir.path(),
        "cc-new",
        &compiler_script(&emit_asm(40), &emit_clean_binary()),
    );
    // Too slow to judge: its count collapses to 0 and it drops out of the
    // denominator set rather than producing an infinite ratio.
    let old = install(dir.path(), "cc-old", "#!/bin/sh\nsleep 5\n");

    let mut config = test_config(&corpus, &output);
    config.compile_timeout = Duration::from_millis(300);
    config.random_rounds = 1;

    let templates = load_corpus(&config.corpus_dir, config.max_source_lines).unwrap();
    let oracle = Oracle::new(&current, &[old], &config).unwrap();
    let mut controller =
        Controller::new(Arc::new(oracle), config, CancelToken::new()).with_rng_seed(11);

    let outcome = controller.run(templates);
    assert!(outcome.accepted.is_empty());
}
