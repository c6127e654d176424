//! cmodel CLI
//!
//! Command-line interface for extracting C/C++ models.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cmodel_core::{Config, Error, FileModel, ProjectModel};
use cmodel_parser::{
    filter_significant, CParser, MacroDefinition, MacroTable, PreprocessorEvaluator,
    ProjectParser, Tokenizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cmodel")]
#[command(author, version, about = "C/C++ source model extractor", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse source roots into a project model
    Parse {
        /// Source directories or files (default: the config's source folders)
        #[arg(value_name = "ROOTS")]
        roots: Vec<PathBuf>,

        /// Configuration file (JSON or YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Macro definition, NAME or NAME=VALUE
        #[arg(short = 'D', value_name = "NAME[=VALUE]")]
        define: Vec<String>,

        /// Only parse files directly under each root
        #[arg(long)]
        no_recursive: bool,

        /// Parse files one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Parse a single file
    File {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Macro definition, NAME or NAME=VALUE
        #[arg(short = 'D', value_name = "NAME[=VALUE]")]
        define: Vec<String>,

        /// Output format (json, text)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Print the significant tokens of a file
    Tokens {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Verify a saved model
    Check {
        /// Model JSON written by `parse`
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Parse {
            roots,
            config,
            output,
            define,
            no_recursive,
            sequential,
        } => {
            cmd_parse(
                &roots,
                config.as_deref(),
                output.as_deref(),
                &define,
                !no_recursive,
                sequential,
            )?;
        }
        Commands::File { file, define, format } => {
            cmd_file(&file, &define, &format)?;
        }
        Commands::Tokens { file } => {
            cmd_tokens(&file)?;
        }
        Commands::Check { model } => {
            cmd_check(&model)?;
        }
    }

    Ok(())
}

fn parse_defines(args: &[String]) -> Result<Vec<MacroDefinition>> {
    args.iter()
        .map(|arg| MacroDefinition::parse_arg(arg).with_context(|| format!("invalid -D '{}'", arg)))
        .collect()
}

fn cmd_parse(
    roots: &[PathBuf],
    config_path: Option<&Path>,
    output: Option<&Path>,
    defines: &[String],
    recursive: bool,
    sequential: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    for definition in parse_defines(defines)? {
        config.define(definition.name, definition.value);
    }
    if sequential {
        config.parallel = false;
    }
    let recursive = recursive && config.recursive;
    let roots = resolve_roots(roots, &config)?;

    info!("Parsing {} source root(s)", roots.len());
    let parser = ProjectParser::new(config);
    let model = parser.parse_project(&roots, recursive)?;

    let json = model.to_json()?;
    if let Some(out_path) = output {
        std::fs::write(out_path, &json)?;
        info!("Model written to: {}", out_path.display());
    } else {
        println!("{}", json);
    }
    print_project_summary(&model);
    Ok(())
}

/// Roots from the command line, else the config's source folders
fn resolve_roots(roots: &[PathBuf], config: &Config) -> Result<Vec<PathBuf>> {
    let roots = if roots.is_empty() {
        config.source_folders.clone()
    } else {
        roots.to_vec()
    };
    if roots.is_empty() {
        return Err(Error::NoInputFiles("no source roots given or configured".into()).into());
    }
    Ok(roots)
}

fn print_project_summary(model: &ProjectModel) {
    let count = |f: fn(&FileModel) -> usize| model.files.values().map(f).sum::<usize>();
    eprintln!("Project: {}", model.project_name);
    eprintln!("   Files: {}", model.files.len());
    eprintln!("   Structs: {}", count(|f| f.structs.len()));
    eprintln!("   Unions: {}", count(|f| f.unions.len()));
    eprintln!("   Enums: {}", count(|f| f.enums.len()));
    eprintln!("   Functions: {}", count(|f| f.functions.len()));
    eprintln!("   Globals: {}", count(|f| f.globals.len()));
    eprintln!("   Includes: {}", model.global_includes.len());
}

fn cmd_file(file: &Path, defines: &[String], format: &str) -> Result<()> {
    let macros: MacroTable = parse_defines(defines)?.into_iter().collect();
    let evaluator = PreprocessorEvaluator::with_macros(macros);
    let mut parser = CParser::with_evaluator(Arc::new(evaluator));
    let model = parser.parse_file(file)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&model)?),
        "text" => print_file_model(&model),
        other => bail!("unknown format '{}' (expected json or text)", other),
    }

    for diagnostic in parser.last_diagnostics() {
        eprintln!("   line {}: {:?}: {}", diagnostic.line, diagnostic.kind, diagnostic.message);
    }
    Ok(())
}

fn print_file_model(model: &FileModel) {
    println!("{} ({})", model.file_path, model.encoding_used);
    for include in &model.includes {
        println!("   #include {}", include);
    }
    for name in &model.macros {
        println!("   #define {}", name);
    }
    for (kind, map) in [("struct", &model.structs), ("union", &model.unions)] {
        for aggregate in map.values() {
            match &aggregate.typedef_name {
                Some(alias) => println!("   {} {} (typedef {})", kind, aggregate.name, alias),
                None => println!("   {} {}", kind, aggregate.name),
            }
            for field in &aggregate.fields {
                println!("      {} {}", field.type_name, field.name);
            }
            for function in &aggregate.functions {
                println!("      fn {}()", function.name);
            }
        }
    }
    for e in model.enums.values() {
        let names: Vec<&str> = e.values.iter().map(|v| v.name.as_str()).collect();
        println!("   enum {} {{ {} }}", e.name, names.join(", "));
    }
    for alias in model.aliases.values() {
        println!("   typedef {} {}", alias.original_type, alias.name);
    }
    for function in &model.functions {
        let params: Vec<String> = function
            .parameters
            .iter()
            .map(|p| format!("{} {}", p.type_name, p.name))
            .collect();
        let kind = if function.is_declaration { "decl" } else { "def" };
        println!("   {} {}({}) [{}]", function.return_type, function.name, params.join(", "), kind);
    }
    for global in &model.globals {
        match &global.value {
            Some(value) => println!("   {} {} = {}", global.type_name, global.name, value),
            None => println!("   {} {}", global.type_name, global.name),
        }
    }
    for (parent, children) in &model.anonymous_relationships {
        println!("   {} -> {}", parent, children.join(", "));
    }
}

fn cmd_tokens(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let source = String::from_utf8_lossy(&bytes);
    let (tokens, diagnostics) = Tokenizer::new(&source).run();

    for token in filter_significant(&tokens) {
        println!("{:>5}:{:<4} {:<12?} {}", token.line, token.column, token.kind, token.value);
    }
    for diagnostic in diagnostics.items() {
        eprintln!("   line {}: {}", diagnostic.line, diagnostic.message);
    }
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let model = ProjectModel::load(path)?;

    let restored = ProjectModel::from_json(&model.to_json()?)?;
    if restored != model {
        bail!("{}: model does not survive a JSON round trip", path.display());
    }
    model.validate()?;

    println!("✅ {}: {} files OK", path.display(), model.files.len());
    Ok(())
}
