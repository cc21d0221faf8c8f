use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use lex::Lexer;
use parse::parse_file;

/// Runtime stub linked into every executable: compilation targets
/// -nostdlib, so something has to call main and hand its result to the
/// exit syscall.
const START_STUB: &str = "\
.text
.globl _start
_start:
    call main
    mov %rax, %rdi
    mov $60, %rax
    syscall
";

#[derive(Parser, Debug)]
#[command(
    name = "wispcc",
    about = "Wisp C compiler — a restricted C subset to x86_64 assembly",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lex a source file and print tokens
    Tokens {
        /// Input C file
        input: PathBuf,
    },
    /// Parse a source file and print the AST (debug format)
    Ast {
        /// Input C file
        input: PathBuf,
    },
    /// Compile and print the generated assembly
    EmitAsm {
        /// Input C file
        input: PathBuf,
    },
    /// Build: compile, assemble with `as`, link with `ld` into an executable
    Build(BuildArgs),
    /// Build a temp executable and run it, propagating the exit code
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Input C file
    input: PathBuf,
    /// Output path (default: a.out, or stem.s with -S)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Stop after compilation and write the assembly file
    #[arg(short = 'S', long = "emit-asm")]
    emit_asm: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input C file
    input: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Tokens { input } => cmd_tokens(&input),
        Commands::Ast { input } => cmd_ast(&input),
        Commands::EmitAsm { input } => cmd_emit_asm(&input),
        Commands::Build(args) => cmd_build(&args),
        Commands::Run(args) => {
            let code = cmd_run(&args)?;
            std::process::exit(code);
        }
    }
}

fn read_source(input: &Path) -> Result<String> {
    if !input.exists() {
        bail!("input file not found: {}", input.display());
    }
    fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

/// The whole middle end: parse, build SSA, optimize, destruct, emit.
fn compile_to_asm(input: &Path) -> Result<String> {
    let src = read_source(input)?;
    let file = parse_file(&src)?;
    let module_name = input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let mut module = ir::Module::new(&module_name);
    ir::build_module(&file, &mut module)?;
    ir::optimize(&mut module);
    ir::destruct_module(&mut module);
    backend::emit_module(&module)
}

fn resolve_tool(env_var: &str, name: &str) -> Result<PathBuf> {
    std::env::var(env_var)
        .map(PathBuf::from)
        .ok()
        .or_else(|| which::which(name).ok())
        .ok_or_else(|| anyhow!("no `{}` found in PATH; install binutils", name))
}

fn run_tool(mut cmd: Command) -> Result<()> {
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to spawn {:?}", cmd))?;
    if !status.success() {
        bail!("{:?} failed with status: {}", cmd.get_program(), status);
    }
    Ok(())
}

/// Assemble `asm` and link it with the `_start` stub into `exe_path`.
fn assemble_and_link(asm: &str, work_dir: &Path, exe_path: &Path) -> Result<()> {
    let asm_path = work_dir.join("out.s");
    let obj_path = work_dir.join("out.o");
    let stub_s = work_dir.join("start.s");
    let stub_o = work_dir.join("start.o");
    fs::write(&asm_path, asm)?;
    fs::write(&stub_s, START_STUB)?;

    let as_tool = resolve_tool("WISPCC_AS", "as")?;
    let mut cmd = Command::new(&as_tool);
    cmd.arg(&asm_path).arg("-o").arg(&obj_path);
    run_tool(cmd)?;
    let mut cmd = Command::new(&as_tool);
    cmd.arg(&stub_s).arg("-o").arg(&stub_o);
    run_tool(cmd)?;

    let ld_tool = resolve_tool("WISPCC_LD", "ld")?;
    let mut cmd = Command::new(&ld_tool);
    cmd.arg(&stub_o).arg(&obj_path).arg("-o").arg(exe_path);
    run_tool(cmd)?;
    Ok(())
}

fn cmd_tokens(input: &Path) -> Result<()> {
    let src = read_source(input)?;
    let mut lx = Lexer::new(&src);
    while let Some(tok) = lx.next_token() {
        println!("{:?} @ {}:{}", tok.kind, tok.span.line, tok.span.col);
    }
    Ok(())
}

fn cmd_ast(input: &Path) -> Result<()> {
    let src = read_source(input)?;
    let file = parse_file(&src)?;
    println!("{:#?}", file);
    Ok(())
}

fn cmd_emit_asm(input: &Path) -> Result<()> {
    let asm = compile_to_asm(input)?;
    print!("{}", asm);
    Ok(())
}

fn cmd_build(args: &BuildArgs) -> Result<()> {
    let asm = compile_to_asm(&args.input)?;

    let stem = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let want_asm = args.emit_asm
        || args
            .output
            .as_ref()
            .is_some_and(|p| p.extension().is_some_and(|e| e == "s"));

    if want_asm {
        let out_path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.s", stem)));
        fs::write(&out_path, asm)?;
        return Ok(());
    }

    let out_path = args.output.clone().unwrap_or_else(|| PathBuf::from("a.out"));
    let dir = tempfile::tempdir()?;
    assemble_and_link(&asm, dir.path(), &out_path)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let asm = compile_to_asm(&args.input)?;

    let dir = tempfile::tempdir()?;
    let exe_path = dir.path().join("a.out");
    assemble_and_link(&asm, dir.path(), &exe_path)?;

    let status = Command::new(&exe_path)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to run {}", exe_path.display()))?;
    Ok(status.code().unwrap_or(1))
}
