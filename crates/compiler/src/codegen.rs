//! x86-64 code generation.
//!
//! Walks the typed AST and emits AT&T-syntax assembly for the System V
//! AMD64 ABI. Expressions evaluate into `%rax`; binary operands travel
//! through the machine stack (`push`/`pop`), and a depth counter checks
//! that every push is matched by function exit. Frame offsets are
//! assigned here, before any code is emitted.

use crate::ast::{BinaryOp, Decl, Function, GlobalVar, Node, NodeKind, Program, VarRef};
use crate::error::CompileError;
use crate::types::{Type, TypeKind, align_to};

/// Argument-passing registers, by index and operand size.
const ARG_REGS_8: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
const ARG_REGS_4: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
const ARG_REGS_2: [&str; 6] = ["%di", "%si", "%dx", "%cx", "%r8w", "%r9w"];
const ARG_REGS_1: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];

/// Generate assembly for a whole program. Frame offsets are written back
/// into the program's functions, so callers can inspect them afterwards.
pub fn generate(program: &mut Program) -> Result<Vec<String>, CompileError> {
    assign_frame_offsets(program)?;

    let mut generator = CodeGen::new();
    for decl in &program.decls {
        if let Decl::Var(var) = decl {
            generator.emit_data(var);
        }
    }
    for decl in &program.decls {
        if let Decl::Func(func) = decl {
            if func.is_definition {
                generator.emit_function(func)?;
            }
        }
    }
    // Non-executable stack marker; newer linkers warn without it.
    generator.emit("  .section .note.GNU-stack, \"\", @progbits");
    Ok(generator.out)
}

/// Walk each function's locals, newest first, accumulating sizes and
/// aligning as we go. Offsets are negative (below %rbp); the total is
/// rounded up to a multiple of 16.
fn assign_frame_offsets(program: &mut Program) -> Result<(), CompileError> {
    for decl in &mut program.decls {
        let Decl::Func(func) = decl else { continue };
        let mut total = 0i64;
        for local in func.locals.iter_mut().rev() {
            if local.ty.size < 0 || local.ty.align <= 0 {
                return Err(CompileError::codegen(format!(
                    "invalid variable type for '{}'",
                    local.name
                )));
            }
            total += local.ty.size;
            total = align_to(total, local.ty.align);
            local.offset = -total;
        }
        func.stack_size = align_to(total, 16);
    }
    Ok(())
}

struct CodeGen {
    out: Vec<String>,
    /// Current push/pop depth; zero again at every function exit.
    depth: i64,
    /// Label counter, monotonic across the whole output so every
    /// generated label is unique.
    labels: usize,
}

impl CodeGen {
    fn new() -> Self {
        CodeGen {
            out: Vec::new(),
            depth: 0,
            labels: 0,
        }
    }

    fn emit(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }

    fn push(&mut self) {
        self.emit("  push %rax");
        self.depth += 1;
    }

    fn pop(&mut self, reg: &str) {
        self.emit(format!("  pop {}", reg));
        self.depth -= 1;
    }

    fn next_label(&mut self) -> usize {
        self.labels += 1;
        self.labels
    }

    // ------------------------------------------------------------------
    // Data segment
    // ------------------------------------------------------------------

    fn emit_data(&mut self, var: &GlobalVar) {
        self.emit("  .data");
        self.emit(format!("  .globl {}", var.name));
        self.emit(format!("{}:", var.name));
        match &var.init_data {
            Some(bytes) => {
                for byte in bytes {
                    self.emit(format!("  .byte {}", byte));
                }
            }
            None => self.emit(format!("  .zero {}", var.ty.size)),
        }
    }

    // ------------------------------------------------------------------
    // Text segment
    // ------------------------------------------------------------------

    fn emit_function(&mut self, func: &Function) -> Result<(), CompileError> {
        let body = func.body.as_ref().ok_or_else(|| {
            CompileError::codegen(format!("body of '{}' is undefined", func.name))
        })?;

        self.emit("  .text");
        self.emit(format!("  .globl {}", func.name));
        self.emit(format!("{}:", func.name));

        // Prologue
        self.emit("  push %rbp");
        self.emit("  mov %rsp, %rbp");
        self.emit(format!("  sub ${}, %rsp", func.stack_size));

        // Spill parameters from the argument registers into their slots.
        for (index, param) in func.locals.iter().take(func.param_count).enumerate() {
            let reg = arg_register(index, param.ty.size)?;
            self.emit(format!("  mov {}, {}(%rbp)", reg, param.offset));
        }

        self.gen_stmt(body, func)?;
        debug_assert_eq!(self.depth, 0, "unbalanced push/pop in '{}'", func.name);

        // Epilogue
        self.emit(format!(".L.return.{}:", func.name));
        self.emit("  mov %rbp, %rsp");
        self.emit("  pop %rbp");
        self.emit("  ret");
        Ok(())
    }

    fn gen_stmt(&mut self, node: &Node, func: &Function) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Return(expr) => {
                self.gen_expr(expr, func)?;
                self.emit(format!("  jmp .L.return.{}", func.name));
                Ok(())
            }
            NodeKind::ExpressionStatement(expr) => self.gen_expr(expr, func),
            NodeKind::Block(body) => {
                for stmt in body {
                    self.gen_stmt(stmt, func)?;
                }
                Ok(())
            }
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.next_label();
                self.gen_expr(cond, func)?;
                self.emit("  cmp $0, %rax");
                self.emit(format!("  je .L.else.{}", c));
                self.gen_stmt(then_branch, func)?;
                self.emit(format!("  jmp .L.end.{}", c));
                self.emit(format!(".L.else.{}:", c));
                if let Some(branch) = else_branch {
                    self.gen_stmt(branch, func)?;
                }
                self.emit(format!(".L.end.{}:", c));
                Ok(())
            }
            NodeKind::For {
                init,
                cond,
                increment,
                body,
            } => {
                let c = self.next_label();
                if let Some(init) = init {
                    self.gen_stmt(init, func)?;
                }
                self.emit(format!(".L.begin.{}:", c));
                if let Some(cond) = cond {
                    self.gen_expr(cond, func)?;
                    self.emit("  cmp $0, %rax");
                    self.emit(format!("  je .L.end.{}", c));
                }
                self.gen_stmt(body, func)?;
                if let Some(increment) = increment {
                    self.gen_expr(increment, func)?;
                }
                self.emit(format!("  jmp .L.begin.{}", c));
                self.emit(format!(".L.end.{}:", c));
                Ok(())
            }
            _ => Err(CompileError::codegen("invalid statement")),
        }
    }

    /// Evaluate an expression into `%rax`.
    fn gen_expr(&mut self, node: &Node, func: &Function) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Number(value) => {
                self.emit(format!("  mov ${}, %rax", value));
                Ok(())
            }
            NodeKind::Negation(operand) => {
                self.gen_expr(operand, func)?;
                self.emit("  neg %rax");
                Ok(())
            }
            NodeKind::AddressOf(operand) => self.gen_addr(operand, func),
            NodeKind::Dereference(operand) => {
                self.gen_expr(operand, func)?;
                self.load(expr_type(node)?);
                Ok(())
            }
            NodeKind::Variable(_) | NodeKind::DotAccess { .. } => {
                self.gen_addr(node, func)?;
                self.load(expr_type(node)?);
                Ok(())
            }
            NodeKind::Assignment { lhs, rhs } => {
                self.gen_addr(lhs, func)?;
                self.push();
                self.gen_expr(rhs, func)?;
                self.store(expr_type(node)?);
                Ok(())
            }
            NodeKind::FunctionCall { name, args } => {
                for arg in args {
                    self.gen_expr(arg, func)?;
                    self.push();
                }
                for index in (0..args.len()).rev() {
                    if index >= ARG_REGS_8.len() {
                        return Err(CompileError::codegen(format!(
                            "too many arguments in call to '{}'",
                            name
                        )));
                    }
                    self.pop(ARG_REGS_8[index]);
                }
                self.emit("  mov $0, %rax");
                self.emit(format!("  call {}", name));
                Ok(())
            }
            NodeKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs, func)?;
                self.gen_expr(rhs, func)
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.gen_expr(rhs, func)?;
                self.push();
                self.gen_expr(lhs, func)?;
                self.pop("%rdi");
                self.gen_binary_op(*op);
                Ok(())
            }
            _ => Err(CompileError::codegen("invalid expression")),
        }
    }

    fn gen_binary_op(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => self.emit("  add %rdi, %rax"),
            BinaryOp::Sub => self.emit("  sub %rdi, %rax"),
            BinaryOp::Mul => self.emit("  imul %rdi, %rax"),
            BinaryOp::Div => {
                self.emit("  cqo");
                self.emit("  idiv %rdi");
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
                self.emit("  cmp %rdi, %rax");
                let set = match op {
                    BinaryOp::Eq => "sete",
                    BinaryOp::Ne => "setne",
                    BinaryOp::Lt => "setl",
                    _ => "setle",
                };
                self.emit(format!("  {} %al", set));
                self.emit("  movzb %al, %rax");
            }
        }
    }

    /// Put the address an lvalue designates into `%rax`.
    fn gen_addr(&mut self, node: &Node, func: &Function) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Variable(VarRef::Local { index, name, .. }) => {
                let local = func.locals.get(*index).ok_or_else(|| {
                    CompileError::codegen(format!("unknown local '{}'", name))
                })?;
                self.emit(format!("  lea {}(%rbp), %rax", local.offset));
                Ok(())
            }
            NodeKind::Variable(VarRef::Global { name, .. }) => {
                self.emit(format!("  lea {}(%rip), %rax", name));
                Ok(())
            }
            NodeKind::Dereference(operand) => self.gen_expr(operand, func),
            NodeKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs, func)?;
                self.gen_addr(rhs, func)
            }
            NodeKind::DotAccess { base, member } => {
                self.gen_addr(base, func)?;
                self.emit(format!("  add ${}, %rax", member.offset));
                Ok(())
            }
            _ => Err(CompileError::codegen("not an lvalue")),
        }
    }

    /// Load the value `%rax` points at, sized by type. Arrays, structs
    /// and unions stay as addresses.
    fn load(&mut self, ty: &Type) {
        match ty.kind {
            TypeKind::Array | TypeKind::Struct | TypeKind::Union => {}
            _ => match ty.size {
                1 => self.emit("  movsbq (%rax), %rax"),
                2 => self.emit("  movswq (%rax), %rax"),
                4 => self.emit("  movsxd (%rax), %rax"),
                _ => self.emit("  mov (%rax), %rax"),
            },
        }
    }

    /// Store `%rax` through the address on top of the stack, sized by
    /// type. Structs and unions are copied byte by byte.
    fn store(&mut self, ty: &Type) {
        self.pop("%rdi");
        match ty.kind {
            TypeKind::Struct | TypeKind::Union => {
                for i in 0..ty.size {
                    self.emit(format!("  mov {}(%rax), %r8b", i));
                    self.emit(format!("  mov %r8b, {}(%rdi)", i));
                }
            }
            _ => match ty.size {
                1 => self.emit("  mov %al, (%rdi)"),
                2 => self.emit("  mov %ax, (%rdi)"),
                4 => self.emit("  mov %eax, (%rdi)"),
                _ => self.emit("  mov %rax, (%rdi)"),
            },
        }
    }
}

fn arg_register(index: usize, size: i64) -> Result<&'static str, CompileError> {
    if index >= ARG_REGS_8.len() {
        return Err(CompileError::codegen("too many parameters"));
    }
    Ok(match size {
        1 => ARG_REGS_1[index],
        2 => ARG_REGS_2[index],
        4 => ARG_REGS_4[index],
        _ => ARG_REGS_8[index],
    })
}

fn expr_type(node: &Node) -> Result<&Type, CompileError> {
    node.ty
        .as_ref()
        .ok_or_else(|| CompileError::codegen("expression node has no type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile_asm(source: &str) -> Vec<String> {
        let (mut program, _) = parse(source);
        generate(&mut program).unwrap()
    }

    fn parse(source: &str) -> (Program, crate::tac::QuadBuffer) {
        let tokens = tokenize(source).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn joined(lines: &[String]) -> String {
        lines.join("\n")
    }

    #[test]
    fn test_return_constant() {
        let asm = compile_asm("int main(){return 42;}");
        let text = joined(&asm);
        assert!(text.contains("  .globl main"));
        assert!(text.contains("main:"));
        assert!(text.contains("  mov $42, %rax"));
        assert!(text.contains("  jmp .L.return.main"));
        assert!(text.contains(".L.return.main:"));
        assert!(text.contains("  ret"));
    }

    #[test]
    fn test_prologue_and_epilogue() {
        let asm = compile_asm("int main(){int a=1; return a;}");
        let text = joined(&asm);
        assert!(text.contains("  push %rbp"));
        assert!(text.contains("  mov %rsp, %rbp"));
        assert!(text.contains("  sub $16, %rsp"));
        assert!(text.contains("  mov %rbp, %rsp"));
        assert!(text.contains("  pop %rbp"));
    }

    #[test]
    fn test_frame_offsets_are_aligned_and_inside_frame() {
        let (mut program, _) = parse(
            "int f(){char c; int i; i64 l; short s; struct T{int a; char b;} t; return 0;}",
        );
        generate(&mut program).unwrap();
        let func = program.find_function("f").unwrap();
        assert_eq!(func.stack_size % 16, 0);
        for local in &func.locals {
            assert!(local.offset < 0);
            assert_eq!((-local.offset) % local.ty.align, 0);
            assert!(-local.offset <= func.stack_size);
        }
    }

    #[test]
    fn test_distinct_locals_get_distinct_offsets() {
        let (mut program, _) = parse("int f(){int a; int b; int c; return 0;}");
        generate(&mut program).unwrap();
        let func = program.find_function("f").unwrap();
        let mut offsets: Vec<i64> = func.locals.iter().map(|l| l.offset).collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 3);
    }

    #[test]
    fn test_parameters_spill_from_argument_registers() {
        let asm = compile_asm(
            "int f(int a, char b, short c, i64 d){return a;} int main(){return f(1,2,3,4);}",
        );
        let text = joined(&asm);
        assert!(text.contains(", %edi") || text.contains("  mov %edi, "));
        assert!(text.contains("  mov %sil, "));
        assert!(text.contains("  mov %dx, "));
        assert!(text.contains("  mov %rcx, "));
    }

    #[test]
    fn test_call_pops_arguments_in_reverse() {
        let asm = compile_asm("int main(){return add(3,4);} int add(int x,int y){return x+y;}");
        let text = joined(&asm);
        let rsi = text.find("  pop %rsi").unwrap();
        let rdi = text.find("  pop %rdi").unwrap();
        assert!(rsi < rdi, "last argument must be popped first");
        assert!(text.contains("  mov $0, %rax"));
        assert!(text.contains("  call add"));
    }

    #[test]
    fn test_forward_declaration_emits_no_code() {
        let asm = compile_asm("int add(int x,int y); int main(){return add(1,2);}");
        let text = joined(&asm);
        assert!(!text.contains("add:"));
        assert!(text.contains("  call add"));
    }

    #[test]
    fn test_global_variable_in_data_section() {
        let asm = compile_asm("int g; int main(){g=7; return g;}");
        let text = joined(&asm);
        assert!(text.contains("  .data"));
        assert!(text.contains("  .globl g"));
        assert!(text.contains("g:"));
        assert!(text.contains("  .zero 4"));
        assert!(text.contains("  lea g(%rip), %rax"));
    }

    #[test]
    fn test_string_literal_bytes_with_nul() {
        let asm = compile_asm("int main(){char *s; s=\"AB\"; return 0;}");
        let text = joined(&asm);
        assert!(text.contains(".LC0:"));
        assert!(text.contains("  .byte 65"));
        assert!(text.contains("  .byte 66"));
        assert!(text.contains("  .byte 0"));
    }

    #[test]
    fn test_sized_loads() {
        let asm = compile_asm("int main(){char c; short s; int i; i64 l; c=1; s=2; i=3; l=4; return c+s+i+l;}");
        let text = joined(&asm);
        assert!(text.contains("  movsbq (%rax), %rax"));
        assert!(text.contains("  movswq (%rax), %rax"));
        assert!(text.contains("  movsxd (%rax), %rax"));
        assert!(text.contains("  mov (%rax), %rax"));
    }

    #[test]
    fn test_sized_stores() {
        let asm = compile_asm("int main(){char c; short s; int i; i64 l; c=1; s=2; i=3; l=4; return 0;}");
        let text = joined(&asm);
        assert!(text.contains("  mov %al, (%rdi)"));
        assert!(text.contains("  mov %ax, (%rdi)"));
        assert!(text.contains("  mov %eax, (%rdi)"));
        assert!(text.contains("  mov %rax, (%rdi)"));
    }

    #[test]
    fn test_struct_assignment_copies_bytes() {
        let asm = compile_asm(
            "struct S{int a; char b;}; int main(){struct S x; struct S y; x.a=1; y=x; return y.a;}",
        );
        let text = joined(&asm);
        assert!(text.contains("  mov 0(%rax), %r8b"));
        assert!(text.contains("  mov %r8b, 0(%rdi)"));
        assert!(text.contains("  mov 7(%rax), %r8b"));
    }

    #[test]
    fn test_member_access_adds_offset() {
        let asm = compile_asm("struct S{int a; int b;}; int main(){struct S s; s.b=2; return s.b;}");
        let text = joined(&asm);
        assert!(text.contains("  add $4, %rax"));
    }

    #[test]
    fn test_comparison_uses_setcc() {
        let asm = compile_asm("int main(){return 1<2;}");
        let text = joined(&asm);
        assert!(text.contains("  cmp %rdi, %rax"));
        assert!(text.contains("  setl %al"));
        assert!(text.contains("  movzb %al, %rax"));
    }

    #[test]
    fn test_division_sign_extends() {
        let asm = compile_asm("int main(){return 7/2;}");
        let text = joined(&asm);
        assert!(text.contains("  cqo"));
        assert!(text.contains("  idiv %rdi"));
    }

    #[test]
    fn test_if_labels() {
        let asm = compile_asm("int main(){if(1) return 2; else return 3;}");
        let text = joined(&asm);
        assert!(text.contains("  je .L.else.1"));
        assert!(text.contains(".L.else.1:"));
        assert!(text.contains(".L.end.1:"));
    }

    #[test]
    fn test_loop_labels() {
        let asm = compile_asm("int main(){int i; for(i=0;i<3;i=i+1){} return i;}");
        let text = joined(&asm);
        assert!(text.contains(".L.begin.1:"));
        assert!(text.contains("  je .L.end.1"));
        assert!(text.contains("  jmp .L.begin.1"));
        assert!(text.contains(".L.end.1:"));
    }

    #[test]
    fn test_labels_unique_across_functions() {
        let asm = compile_asm(
            "int f(){if(1){return 1;} return 0;} int main(){if(1){return 2;} return f();}",
        );
        let text = joined(&asm);
        // the counter never resets, so each definition appears once
        for label in [".L.else.1:", ".L.end.1:", ".L.else.2:", ".L.end.2:"] {
            assert_eq!(text.matches(label).count(), 1, "label {}", label);
        }
    }

    #[test]
    fn test_jump_targets_are_defined_exactly_once() {
        let asm = compile_asm(
            "int main(){int i; int s; s=0; for(i=0;i<5;i=i+1){if(i==2){s=s+1;}} return s;}",
        );
        for line in &asm {
            if let Some(target) = line
                .trim()
                .strip_prefix("je ")
                .or_else(|| line.trim().strip_prefix("jmp "))
            {
                if target.starts_with(".L.return") {
                    continue;
                }
                let definition = format!("{}:", target);
                let count = asm.iter().filter(|l| l.trim() == definition).count();
                assert_eq!(count, 1, "target {} must be defined once", target);
            }
        }
    }

    #[test]
    fn test_undefined_body_is_rejected() {
        let func = Function {
            name: "ghost".to_string(),
            ty: Type::function(Type::int(), vec![]),
            locals: vec![],
            param_count: 0,
            body: None,
            stack_size: 0,
            is_definition: true,
        };
        let mut generator = CodeGen::new();
        let err = generator.emit_function(&func).unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }

    #[test]
    fn test_address_of_non_lvalue_fails() {
        let tokens = tokenize("int main(){return &(1+2);}").unwrap();
        let (mut program, _) = Parser::new(tokens).parse().unwrap();
        let err = generate(&mut program).unwrap_err();
        assert!(err.to_string().contains("not an lvalue"));
    }
}
