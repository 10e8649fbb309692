//! Minic compiler library.
//!
//! An ahead-of-time compiler for a C subset. One call to [`compile`]
//! runs the whole pipeline on a single compilation unit and produces two
//! artifacts: GNU-as assembly text for the System V AMD64 ABI, and a
//! human-readable quadruple listing of the same program.
//!
//! ```rust
//! let output = minicc::compile("int main(){return 42;}").unwrap();
//! assert!(output.assembly.iter().any(|l| l.contains("mov $42, %rax")));
//! assert!(output.quadruple.starts_with("address"));
//! ```
//!
//! The pipeline is `tokenize -> parse (emits quadruples as a side
//! effect) -> type-decorate -> generate`. All compile-session state
//! lives in values threaded through the phases, so repeated calls are
//! independent; `compile` performs no I/O and never invokes an external
//! toolchain (the CLI driver does that for `build`).

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod tac;
pub mod typecheck;
pub mod types;

pub use ast::Program;
pub use config::BuildConfig;
pub use error::CompileError;
pub use parser::Parser;

use tracing::debug;

/// The two artifacts of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// Assembly text, one line per entry, ready to be written to a `.s`
    /// file and assembled with GNU as.
    pub assembly: Vec<String>,
    /// The quadruple listing as a fixed-width table with a header row.
    pub quadruple: String,
}

/// Compile one compilation unit. The first error aborts the pipeline;
/// no partial results are returned on failure.
pub fn compile(source: &str) -> Result<CompileOutput, CompileError> {
    let tokens = lexer::tokenize(source)?;
    debug!(tokens = tokens.len(), "tokenized");

    let (mut program, quads) = Parser::new(tokens).parse()?;
    debug!(
        decls = program.decls.len(),
        quads = quads.len(),
        "parsed and type-decorated"
    );

    let assembly = codegen::generate(&mut program)?;
    debug!(lines = assembly.len(), "generated assembly");

    Ok(CompileOutput {
        assembly,
        quadruple: quads.format_listing(),
    })
}

/// Compile and return the assembly joined into one string, trailing
/// newline included. Convenience for writing a `.s` file.
pub fn compile_to_assembly(source: &str) -> Result<String, CompileError> {
    let output = compile(source)?;
    let mut text = output.assembly.join("\n");
    text.push('\n');
    Ok(text)
}
