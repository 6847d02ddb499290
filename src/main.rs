//! Interactive criteria console: parse an expression, show its canonical
//! form, the parameterized fragment and the compiled SELECT, and optionally
//! evaluate it against a loaded JSON object.

use std::fs;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use criteria_engine::sql_compiler::{
    CompilerConfig, ParameterCollector, PostgresFormatter, SqlCompiler,
};
use criteria_engine::{parse_criteria, MappingConfig};

const MAPPING_FILE: &str = "mapping.json";

fn load_mapping() -> MappingConfig {
    match MappingConfig::from_json_file(MAPPING_FILE) {
        Ok(config) => {
            println!("loaded field mapping from {}", MAPPING_FILE);
            config
        }
        Err(e) => {
            println!("no usable {} ({}), using the sample mapping", MAPPING_FILE, e);
            MappingConfig::sample()
        }
    }
}

fn main() -> Result<()> {
    println!("--- criteria console ---");
    println!("type a criteria expression, e.g. Surname = 'Smith' AND Age >= 18");
    println!("commands: :entity <name>, :load <json-file>, :quit");

    let mapping = load_mapping();
    let compiler = SqlCompiler::from_config(CompilerConfig {
        table_mapping: mapping.tables.clone(),
        ..Default::default()
    });

    let mut entity = "Person".to_string();
    let mut candidate: Option<serde_json::Value> = None;

    let mut editor = DefaultEditor::new().context("failed to start the line editor")?;
    loop {
        match editor.readline("criteria> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line).ok();

                if line == ":quit" {
                    break;
                }
                if let Some(name) = line.strip_prefix(":entity ") {
                    entity = name.trim().to_string();
                    println!("compiling against entity '{}'", entity);
                    continue;
                }
                if let Some(path) = line.strip_prefix(":load ") {
                    match load_candidate(path.trim()) {
                        Ok(value) => {
                            println!("loaded candidate object from {}", path.trim());
                            candidate = Some(value);
                        }
                        Err(e) => println!("cannot load candidate: {:#}", e),
                    }
                    continue;
                }

                handle_criteria(line, &mapping, &compiler, &entity, candidate.as_ref());
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("line editor failure"),
        }
    }
    Ok(())
}

fn load_candidate(path: &str) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path))
}

fn handle_criteria(
    line: &str,
    mapping: &MappingConfig,
    compiler: &SqlCompiler,
    entity: &str,
    candidate: Option<&serde_json::Value>,
) {
    let mut criteria = match parse_criteria(line) {
        Ok(criteria) => criteria,
        Err(e) => {
            println!("parse error: {}", e);
            return;
        }
    };
    mapping.resolve_criteria(&mut criteria);

    println!("canonical: {}", criteria);

    let mut sink = ParameterCollector::new();
    let fragment = criteria.to_sql(&PostgresFormatter, &mut sink);
    println!("fragment:  {}", fragment);
    if !sink.parameters().is_empty() {
        let rendered: Vec<String> = sink.parameters().iter().map(|p| p.to_string()).collect();
        println!("params:    [{}]", rendered.join(", "));
    }

    match compiler.compile(entity, Some(&criteria)) {
        Ok(result) => {
            println!("select:    {}", result.sql);
            for optimization in &result.optimizations {
                println!("optimized: {:?}", optimization);
            }
        }
        Err(e) => println!("compile error: {}", e),
    }

    if let Some(candidate) = candidate {
        match criteria.is_match(candidate) {
            Ok(true) => println!("candidate: matches"),
            Ok(false) => println!("candidate: does not match"),
            Err(e) => println!("candidate: evaluation failed: {}", e),
        }
    }
}
