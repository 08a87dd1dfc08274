use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use kite_core::compiler::on_stage_stack;
use kite_core::lexer::lex;
use kite_core::parser::parse_unit;
use kite_core::stdlib::default_stdlib_root;
use kite_core::{CompileOptions, Diagnostics, SourceMap, SourceUnit, analyze, compile};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Output kinds of the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// C++17 source for the entry unit and everything it imports.
    Cpp,
    /// Check only; print diagnostics.
    Check,
    /// The token stream of each input, comments included.
    Tokens,
    /// The syntax tree of each input.
    Ast,
}

/// Command-line arguments of the Kite compiler.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        num_args = 1..,
        help = "Source units to compile; reads a single unit from stdin when omitted"
    )]
    input: Vec<PathBuf>,

    #[arg(short, long, value_name = "FILE", help = "Write output here instead of stdout")]
    output: Option<PathBuf>,

    #[arg(
        long,
        value_name = "NAME",
        help = "Entry unit (defaults to the first input's file stem)"
    )]
    entry: Option<String>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Path to the standard library root (defaults to bundled stdlib)"
    )]
    stdlib: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "cpp", help = "What to produce")]
    emit: Emit,

    #[arg(long, help = "Compile as library (do not emit a C++ main wrapper)")]
    lib: bool,

    #[arg(long, value_name = "N", default_value_t = 1, help = "Parser worker threads")]
    jobs: usize,

    #[arg(long, value_name = "N", help = "Maximum syntactic nesting depth")]
    max_depth: Option<usize>,

    #[arg(long, value_name = "N", help = "Maximum nesting of compile-time calls")]
    const_eval_depth: Option<usize>,

    #[arg(short, long, help = "Log compiler stages to stderr")]
    verbose: bool,

    #[arg(long, help = "Disable colored log output")]
    no_color: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);
    execute(cli)
}

fn init_tracing(cli: &Cli) {
    let fallback = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("KITE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!cli.no_color)
        .init();
}

fn options(cli: &Cli) -> CompileOptions {
    let defaults = CompileOptions::default();
    CompileOptions {
        max_nesting_depth: cli.max_depth.unwrap_or(defaults.max_nesting_depth),
        const_eval_depth_limit: cli.const_eval_depth.unwrap_or(defaults.const_eval_depth_limit),
        emit_main: !cli.lib,
        jobs: cli.jobs.max(1),
        stdlib_root: Some(cli.stdlib.clone().unwrap_or_else(default_stdlib_root)),
        ..defaults
    }
}

fn read_units(inputs: &[PathBuf]) -> Result<Vec<SourceUnit>> {
    if inputs.is_empty() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read source from stdin")?;
        return Ok(vec![SourceUnit::new("main", buffer)]);
    }
    inputs
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read input file {}", path.display()))?;
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("input file {} has no usable name", path.display()))?;
            Ok(SourceUnit::new(name, text))
        })
        .collect()
}

fn execute(cli: Cli) -> Result<()> {
    let options = options(&cli);
    let units = read_units(&cli.input)?;
    let entry = match &cli.entry {
        Some(entry) => entry.clone(),
        None => units.first().map(|unit| unit.name.clone()).unwrap_or_default(),
    };
    debug!(units = units.len(), %entry, emit = ?cli.emit, "starting");

    match cli.emit {
        Emit::Cpp => {
            let output = compile(&units, &entry, &options)?;
            report(&output.diagnostics, &output.sources);
            if let Some(internal) = output.internal_error {
                return Err(internal).context("code generation failed");
            }
            let Some(text) = output.output else {
                bail!(
                    "compilation failed with {} error(s)",
                    output.diagnostics.error_count()
                );
            };
            write_output(cli.output.as_deref(), text.as_bytes())?;
            info!(bytes = text.len(), "wrote C++ output");
        }
        Emit::Check => {
            let analysis = analyze(&units, &options)?;
            report(&analysis.diagnostics, &analysis.frontend.sources);
            if analysis.diagnostics.has_errors() {
                bail!("check failed with {} error(s)", analysis.diagnostics.error_count());
            }
        }
        Emit::Tokens => {
            let mut sources = SourceMap::new();
            let mut text = String::new();
            let mut diagnostics = Diagnostics::new();
            for unit in &units {
                let file = sources.add(unit.name.clone(), unit.text.clone());
                let result = lex(file, &unit.text);
                text.push_str(&format!("// {}\n", unit.name));
                for token in &result.tokens {
                    text.push_str(&format!(
                        "{}..{} {:?} {:?}\n",
                        token.span.start,
                        token.span.end,
                        token.kind,
                        token.text(&unit.text)
                    ));
                }
                diagnostics.extend(result.diagnostics);
            }
            report(&diagnostics, &sources);
            write_output(cli.output.as_deref(), text.as_bytes())?;
        }
        Emit::Ast => {
            let mut sources = SourceMap::new();
            let mut text = String::new();
            let mut diagnostics = Diagnostics::new();
            for unit in &units {
                let file = sources.add(unit.name.clone(), unit.text.clone());
                let parsed = on_stage_stack(|| parse_unit(file, &unit.text, options.max_nesting_depth))?;
                text.push_str(&format!("// {}\n{:#?}\n", unit.name, parsed.module));
                diagnostics.extend(parsed.diagnostics);
            }
            report(&diagnostics, &sources);
            write_output(cli.output.as_deref(), text.as_bytes())?;
        }
    }
    Ok(())
}

fn report(diagnostics: &Diagnostics, sources: &SourceMap) {
    if !diagnostics.is_empty() {
        eprintln!("{}", diagnostics.render(sources));
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    let Some(path) = path else {
        io::stdout().write_all(bytes).context("failed to write to stdout")?;
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    fn kite() -> Command {
        Command::cargo_bin("kite-cli").expect("binary exists")
    }

    #[test]
    fn compiles_to_cpp() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("hello.kite");
        fs::write(
            &input_path,
            "function main() { let x = 40 + 2; println(\"{}\", x); }",
        )
        .expect("write input");
        let output_path = dir.path().join("out/hello.cpp");

        kite()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .assert()
            .success();

        let cpp = fs::read_to_string(&output_path).expect("read output");
        assert!(cpp.contains("int main()"));
        assert!(cpp.contains("void kite_main()"));
    }

    #[test]
    fn reads_stdin_and_writes_stdout() {
        kite()
            .write_stdin("function main() { println(\"hi\"); }")
            .assert()
            .success()
            .stdout(predicate::str::contains("kite_main"));
    }

    #[test]
    fn compiles_several_units_with_an_entry() {
        let dir = tempdir().expect("tempdir");
        let app = dir.path().join("app.kite");
        let util = dir.path().join("util.kite");
        fs::write(&app, "import util;\nfunction main() { println(\"{}\", util::twice(4)); }").expect("write app");
        fs::write(&util, "function twice(x: i64) -> i64 { x * 2 }").expect("write util");

        kite()
            .arg("--input")
            .arg(&util)
            .arg(&app)
            .arg("--entry")
            .arg("app")
            .arg("--jobs")
            .arg("2")
            .assert()
            .success()
            .stdout(predicate::str::contains("util_twice("));
    }

    #[test]
    fn library_mode_needs_no_main() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("lib.kite");
        fs::write(&input_path, "function helper() -> i64 { 1 }").expect("write input");

        kite().arg("--input").arg(&input_path).assert().failure().stderr(predicate::str::contains("E0902"));
        kite()
            .arg("--input")
            .arg(&input_path)
            .arg("--lib")
            .assert()
            .success()
            .stdout(predicate::str::contains("int main()").not());
    }

    #[test]
    fn check_reports_diagnostics_with_locations() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("broken.kite");
        fs::write(&input_path, "function main() {\n    missing(1);\n}").expect("write input");

        kite()
            .arg("--input")
            .arg(&input_path)
            .arg("--emit")
            .arg("check")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error[E0201]"))
            .stderr(predicate::str::contains("broken:2:5"));
    }

    #[test]
    fn prints_tokens_including_comments() {
        kite()
            .arg("--emit")
            .arg("tokens")
            .write_stdin("let x = 1; // one")
            .assert()
            .success()
            .stdout(predicate::str::contains("LineComment"))
            .stdout(predicate::str::contains("IntLiteral \"1\""));
    }

    #[test]
    fn prints_the_syntax_tree() {
        kite()
            .arg("--emit")
            .arg("ast")
            .write_stdin("function main() { }")
            .assert()
            .success()
            .stdout(predicate::str::contains("Function"));
    }

    #[test]
    fn reports_missing_stdlib_root() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("main.kite");
        fs::write(&input_path, "function main() { }").expect("write input");

        kite()
            .arg("--input")
            .arg(&input_path)
            .arg("--stdlib")
            .arg(dir.path().join("missing"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("standard library directory was not found"));
    }

    #[test]
    fn reports_division_by_zero() {
        kite()
            .write_stdin("static DATA: [i32; 10 / 0] = [];\nfunction main() { }")
            .assert()
            .failure()
            .stderr(predicate::str::contains("E0601"));
    }

    #[test]
    fn imports_from_a_custom_stdlib_root() {
        let dir = tempdir().expect("tempdir");
        let stdlib_root = dir.path().join("stdlib");
        fs::create_dir_all(&stdlib_root).expect("create stdlib root");
        fs::write(stdlib_root.join("greet.kite"), "function hello() { println(\"hello\"); }")
            .expect("write library unit");

        kite()
            .arg("--stdlib")
            .arg(&stdlib_root)
            .write_stdin("import greet;\nfunction main() { greet::hello(); }")
            .assert()
            .success()
            .stdout(predicate::str::contains("greet_hello("));
    }
}
