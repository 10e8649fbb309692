//! Recursive-descent parser.
//!
//! Each non-terminal is a method that consumes tokens from the shared
//! cursor and returns an AST node. Parsing drives the rest of the front
//! end: locals and globals are allocated here, the type checker runs
//! once per statement as it is appended to a block, and three-address
//! code is emitted as a side effect (jumps get placeholder targets and
//! are back-patched once the destination address is known).

use std::collections::HashMap;

use crate::ast::{
    BinaryOp, Decl, Function, GlobalVar, LocalVar, Node, NodeIds, NodeKind, Program, VarRef,
};
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind, is_type_keyword};
use crate::scope::ScopeStack;
use crate::tac::QuadBuffer;
use crate::typecheck::add_type;
use crate::types::{Type, TypeKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scopes: ScopeStack,
    quads: QuadBuffer,
    ids: NodeIds,
    /// Overrides for quadruple operand places, by node id.
    places: HashMap<usize, String>,
    /// Locals of the function currently being parsed.
    locals: Vec<LocalVar>,
    decls: Vec<Decl>,
    /// Counter for anonymous string-literal globals (`.LC<N>`).
    string_count: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            scopes: ScopeStack::new(),
            quads: QuadBuffer::new(),
            ids: NodeIds::new(),
            places: HashMap::new(),
            locals: Vec::new(),
            decls: Vec::new(),
            string_count: 0,
        }
    }

    /// Parse one compilation unit. Returns the program together with the
    /// three-address code captured along the way.
    pub fn parse(mut self) -> Result<(Program, QuadBuffer), CompileError> {
        while !self.at_eof() {
            let base = self.declspec()?;

            // A bare `struct S { ... };` declares only the tag.
            if self.consume(";") {
                continue;
            }

            let ty = self.declarator(base.clone())?;
            if ty.kind == TypeKind::Function {
                self.function(ty)?;
            } else {
                self.global_variables(base, ty)?;
            }
        }
        Ok((Program { decls: self.decls }, self.quads))
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::EndOfFile
    }

    fn is(&self, text: &str) -> bool {
        self.peek().is(text)
    }

    /// Return the current token and advance past it. The cursor never
    /// moves past the end-of-file token.
    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::EndOfFile {
            self.pos += 1;
        }
        token
    }

    /// Advance past the current token if it matches.
    fn consume(&mut self, text: &str) -> bool {
        if self.is(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Advance past the current token or report an unexpected-token
    /// error.
    fn skip(&mut self, text: &str) -> Result<(), CompileError> {
        if self.consume(text) {
            return Ok(());
        }
        if self.at_eof() {
            return Err(CompileError::parse("unexpected end of input", text));
        }
        Err(CompileError::parse(
            format!("expected '{}'", text),
            self.peek().text.clone(),
        ))
    }

    fn node(&mut self, kind: NodeKind) -> Node {
        Node::new(kind, self.ids.alloc())
    }

    // ------------------------------------------------------------------
    // Quadruple places
    // ------------------------------------------------------------------

    /// The textual operand a node contributes to the quadruple listing.
    fn place(&self, node: &Node) -> String {
        if let Some(place) = self.places.get(&node.id) {
            return place.clone();
        }
        match &node.kind {
            NodeKind::Number(value) => value.to_string(),
            NodeKind::Variable(var) => var.name().to_string(),
            NodeKind::Dereference(operand) => format!("*{}", self.place(operand)),
            NodeKind::AddressOf(operand) => format!("&{}", self.place(operand)),
            NodeKind::DotAccess { base, member } => {
                format!("{}.{}", self.place(base), member.name)
            }
            NodeKind::Assignment { lhs, .. } => self.place(lhs),
            NodeKind::Comma { rhs, .. } => self.place(rhs),
            _ => format!("N{}", node.id),
        }
    }

    fn temp_place(&self, node: &Node) -> String {
        format!("N{}", node.id)
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// type := 'int' | 'short' | 'char' | 'i64' | 'void'
    ///       | 'struct' ... | 'union' ...
    fn declspec(&mut self) -> Result<Type, CompileError> {
        if self.consume("int") {
            return Ok(Type::int());
        }
        if self.consume("short") {
            return Ok(Type::short());
        }
        if self.consume("char") {
            return Ok(Type::char_type());
        }
        if self.consume("i64") {
            return Ok(Type::int64());
        }
        if self.consume("void") {
            return Ok(Type::void());
        }
        if self.consume("struct") {
            return self.struct_union_decl(true);
        }
        if self.consume("union") {
            return self.struct_union_decl(false);
        }
        Err(CompileError::parse(
            "expected a type",
            self.peek().text.clone(),
        ))
    }

    /// Body of a struct/union declaration, the keyword already consumed.
    /// A named declaration with a body stores the tag in the current
    /// scope; a bare `struct Foo` resolves the tag or fails.
    fn struct_union_decl(&mut self, is_struct: bool) -> Result<Type, CompileError> {
        let tag = if self.peek().kind == TokenKind::Identifier {
            Some(self.advance().text)
        } else {
            None
        };

        if self.consume("{") {
            let members = self.struct_members()?;
            let ty = if is_struct {
                Type::struct_of(members)
            } else {
                Type::union_of(members)
            };
            if let Some(tag) = tag {
                self.scopes.declare_tag(&tag, ty.clone())?;
            }
            return Ok(ty);
        }

        let Some(tag) = tag else {
            return Err(CompileError::parse(
                "expected an identifier",
                self.peek().text.clone(),
            ));
        };
        self.scopes
            .find_tag(&tag)
            .cloned()
            .ok_or_else(|| CompileError::scope(format!("tag '{}' not found", tag)))
    }

    /// member := type declarator (',' declarator)* ';'
    fn struct_members(&mut self) -> Result<Vec<crate::types::Member>, CompileError> {
        let mut members = Vec::new();
        while !self.consume("}") {
            if self.at_eof() {
                return Err(CompileError::parse("unexpected end of input", "}"));
            }
            let base = self.declspec()?;
            loop {
                let ty = self.declarator(base.clone())?;
                let name = ty.name.clone().ok_or_else(|| {
                    CompileError::parse("expected an identifier", self.peek().text.clone())
                })?;
                members.push(crate::types::Member {
                    name,
                    ty,
                    offset: 0,
                });
                if self.consume(",") {
                    continue;
                }
                self.skip(";")?;
                break;
            }
        }
        Ok(members)
    }

    /// declarator := '*'* (identifier | '(' declarator ')') type-suffix
    ///
    /// A parenthesized inner declarator binds tighter than the suffix, so
    /// `int (*x)[3]` is pointer-to-array while `int *x[3]` is
    /// array-of-pointer. The parenthesized form is parsed twice: once
    /// with a throwaway base to find its extent, then for real once the
    /// suffix has been applied to the outer type.
    fn declarator(&mut self, mut ty: Type) -> Result<Type, CompileError> {
        while self.consume("*") {
            ty = Type::pointer_to(ty);
        }

        if self.is("(") {
            let open = self.pos;
            self.advance();
            self.declarator(Type::int())?;
            self.skip(")")?;
            let ty = self.type_suffix(ty)?;
            let end = self.pos;
            self.pos = open + 1;
            let result = self.declarator(ty)?;
            self.pos = end;
            return Ok(result);
        }

        if self.peek().kind != TokenKind::Identifier {
            return Err(CompileError::parse(
                "expected an identifier",
                self.peek().text.clone(),
            ));
        }
        let name = self.advance().text;
        let mut ty = self.type_suffix(ty)?;
        ty.name = Some(name);
        Ok(ty)
    }

    /// Declarator without a name, for `sizeof(type)`.
    fn abstract_declarator(&mut self, mut ty: Type) -> Result<Type, CompileError> {
        while self.consume("*") {
            ty = Type::pointer_to(ty);
        }

        if self.is("(") {
            let open = self.pos;
            self.advance();
            self.abstract_declarator(Type::int())?;
            self.skip(")")?;
            let ty = self.type_suffix(ty)?;
            let end = self.pos;
            self.pos = open + 1;
            let result = self.abstract_declarator(ty)?;
            self.pos = end;
            return Ok(result);
        }

        self.type_suffix(ty)
    }

    /// type-suffix := ('(' param-list ')' | '[' number ']')*
    fn type_suffix(&mut self, ty: Type) -> Result<Type, CompileError> {
        if self.consume("(") {
            return self.func_params(ty);
        }
        if self.consume("[") {
            let token = self.advance();
            if token.kind != TokenKind::NumericLiteral {
                return Err(CompileError::parse("invalid array size", token.text));
            }
            self.skip("]")?;
            let element = self.type_suffix(ty)?;
            return Ok(Type::array_of(element, token.value));
        }
        Ok(ty)
    }

    /// param-list := 'void' | (type declarator (',' type declarator)*)?
    fn func_params(&mut self, return_ty: Type) -> Result<Type, CompileError> {
        let mut params = Vec::new();
        if self.is("void") && self.peek_at(1).is_some_and(|t| t.is(")")) {
            self.advance();
            self.advance();
            return Ok(Type::function(return_ty, params));
        }
        if self.consume(")") {
            return Ok(Type::function(return_ty, params));
        }
        loop {
            let base = self.declspec()?;
            let param = self.declarator(base)?;
            params.push(param);
            if self.consume(",") {
                continue;
            }
            self.skip(")")?;
            break;
        }
        Ok(Type::function(return_ty, params))
    }

    /// A function declaration or definition at file scope. The signature
    /// has been parsed; a `;` here marks a forward declaration.
    fn function(&mut self, ty: Type) -> Result<(), CompileError> {
        let name = ty
            .name
            .clone()
            .ok_or_else(|| CompileError::parse("expected an identifier", "("))?;

        if self.consume(";") {
            let param_count = ty.params.len();
            self.decls.push(Decl::Func(Function {
                name,
                ty,
                locals: Vec::new(),
                param_count,
                body: None,
                stack_size: 0,
                is_definition: false,
            }));
            return Ok(());
        }

        self.locals = Vec::new();
        self.scopes.enter();
        self.quads.emit("begin", Some(name.clone()), None, None);

        for param in &ty.params {
            let param_name = param.name.clone().ok_or_else(|| {
                CompileError::parse("expected an identifier", self.peek().text.clone())
            })?;
            if param.kind == TypeKind::Void {
                return Err(CompileError::type_error(
                    "variable cannot be of type void",
                    param_name,
                ));
            }
            let index = self.locals.len();
            self.locals.push(LocalVar {
                name: param_name.clone(),
                ty: param.clone(),
                offset: 0,
            });
            self.scopes.declare_entry(
                &param_name,
                VarRef::Local {
                    index,
                    name: param_name.clone(),
                    ty: param.clone(),
                },
            )?;
            self.quads.emit("param", Some(param_name), None, None);
        }
        let param_count = ty.params.len();

        let body = self.compound_stmt()?;
        self.scopes.leave()?;

        let locals = std::mem::take(&mut self.locals);
        self.decls.push(Decl::Func(Function {
            name,
            ty,
            locals,
            param_count,
            body: Some(body),
            stack_size: 0,
            is_definition: true,
        }));
        Ok(())
    }

    /// Global variables: the first declarator is already parsed.
    fn global_variables(&mut self, base: Type, first: Type) -> Result<(), CompileError> {
        let mut ty = first;
        loop {
            let name = ty.name.clone().ok_or_else(|| {
                CompileError::parse("expected an identifier", self.peek().text.clone())
            })?;
            if ty.kind == TypeKind::Void {
                return Err(CompileError::type_error(
                    "variable cannot be of type void",
                    name,
                ));
            }
            self.quads
                .emit("declare", Some(name.clone()), Some(ty.to_string()), None);
            self.scopes.declare_entry(
                &name,
                VarRef::Global {
                    name: name.clone(),
                    ty: ty.clone(),
                },
            )?;
            self.decls.push(Decl::Var(GlobalVar {
                name,
                ty: ty.clone(),
                init_data: None,
            }));

            if self.consume(",") {
                ty = self.declarator(base.clone())?;
                continue;
            }
            self.skip(";")?;
            return Ok(());
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// block := '{' (type declaration | statement)* '}'
    ///
    /// Every statement is type-decorated as it is appended.
    fn compound_stmt(&mut self) -> Result<Node, CompileError> {
        self.skip("{")?;
        self.scopes.enter();
        let mut body = Vec::new();
        while !self.consume("}") {
            if self.at_eof() {
                return Err(CompileError::parse("unexpected end of input", "}"));
            }
            let mut stmt = if is_type_keyword(self.peek()) {
                self.declaration()?
            } else {
                self.stmt()?
            };
            add_type(&mut stmt, &mut self.ids)?;
            body.push(stmt);
        }
        self.scopes.leave()?;
        Ok(self.node(NodeKind::Block(body)))
    }

    /// A local declaration statement. Each initialized declarator
    /// produces an assignment wrapped in an expression statement; the
    /// whole declaration becomes a block of those.
    fn declaration(&mut self) -> Result<Node, CompileError> {
        let base = self.declspec()?;
        let mut stmts = Vec::new();

        if self.consume(";") {
            return Ok(self.node(NodeKind::Block(stmts)));
        }

        loop {
            let ty = self.declarator(base.clone())?;
            let name = ty.name.clone().ok_or_else(|| {
                CompileError::parse("expected an identifier", self.peek().text.clone())
            })?;
            if ty.kind == TypeKind::Void {
                return Err(CompileError::type_error(
                    "variable cannot be of type void",
                    name,
                ));
            }

            let index = self.locals.len();
            self.locals.push(LocalVar {
                name: name.clone(),
                ty: ty.clone(),
                offset: 0,
            });
            let var = VarRef::Local {
                index,
                name: name.clone(),
                ty: ty.clone(),
            };
            self.scopes.declare_entry(&name, var.clone())?;
            self.quads
                .emit("declare", Some(name.clone()), Some(ty.to_string()), None);

            if self.consume("=") {
                let lhs = self.node(NodeKind::Variable(var));
                let rhs = self.assign()?;
                let rhs_place = self.place(&rhs);
                self.quads
                    .emit(":=", Some(rhs_place), None, Some(name.clone()));
                let assignment = self.node(NodeKind::Assignment {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                });
                let stmt = self.node(NodeKind::ExpressionStatement(Box::new(assignment)));
                stmts.push(stmt);
            }

            if self.consume(",") {
                continue;
            }
            self.skip(";")?;
            break;
        }
        Ok(self.node(NodeKind::Block(stmts)))
    }

    fn stmt(&mut self) -> Result<Node, CompileError> {
        if self.consume("return") {
            let expr = self.expr()?;
            let place = self.place(&expr);
            self.quads.emit("return", Some(place), None, None);
            self.skip(";")?;
            return Ok(self.node(NodeKind::Return(Box::new(expr))));
        }

        if self.consume("if") {
            return self.if_stmt();
        }
        if self.consume("for") {
            return self.for_stmt();
        }
        if self.consume("while") {
            return self.while_stmt();
        }
        if self.is("{") {
            return self.compound_stmt();
        }
        self.expr_stmt()
    }

    fn if_stmt(&mut self) -> Result<Node, CompileError> {
        self.skip("(")?;
        let cond = self.expr()?;
        let cond_place = self.place(&cond);
        let jump_false = self
            .quads
            .emit("j=", Some(cond_place), Some("0".to_string()), None);
        self.skip(")")?;

        let then_branch = self.stmt()?;
        let else_branch = if self.consume("else") {
            let jump_end = self.quads.emit("j", None, None, None);
            let else_start = self.quads.next_address();
            self.quads.backpatch(jump_false, else_start);
            let branch = self.stmt()?;
            let end = self.quads.next_address();
            self.quads.backpatch(jump_end, end);
            Some(Box::new(branch))
        } else {
            let end = self.quads.next_address();
            self.quads.backpatch(jump_false, end);
            None
        };

        Ok(self.node(NodeKind::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch,
        }))
    }

    /// for '(' expression-statement expression? ';' expression? ')' statement
    ///
    /// The increment's quadruples appear in parse order, between the
    /// condition and the body.
    fn for_stmt(&mut self) -> Result<Node, CompileError> {
        self.skip("(")?;
        let init = self.expr_stmt()?;

        let begin = self.quads.next_address();
        let mut jump_false = None;
        let cond = if self.is(";") {
            None
        } else {
            let cond = self.expr()?;
            let place = self.place(&cond);
            jump_false = Some(self.quads.emit("j=", Some(place), Some("0".to_string()), None));
            Some(cond)
        };
        self.skip(";")?;

        let increment = if self.is(")") { None } else { Some(self.expr()?) };
        self.skip(")")?;

        let body = self.stmt()?;
        self.quads.emit("j", None, None, Some(begin.to_string()));
        if let Some(jump) = jump_false {
            let end = self.quads.next_address();
            self.quads.backpatch(jump, end);
        }

        Ok(self.node(NodeKind::For {
            init: Some(Box::new(init)),
            cond: cond.map(Box::new),
            increment: increment.map(Box::new),
            body: Box::new(body),
        }))
    }

    /// A while loop is a `for` with neither init nor increment.
    fn while_stmt(&mut self) -> Result<Node, CompileError> {
        self.skip("(")?;
        let begin = self.quads.next_address();
        let cond = self.expr()?;
        let place = self.place(&cond);
        let jump_false = self
            .quads
            .emit("j=", Some(place), Some("0".to_string()), None);
        self.skip(")")?;

        let body = self.stmt()?;
        self.quads.emit("j", None, None, Some(begin.to_string()));
        let end = self.quads.next_address();
        self.quads.backpatch(jump_false, end);

        Ok(self.node(NodeKind::For {
            init: None,
            cond: Some(Box::new(cond)),
            increment: None,
            body: Box::new(body),
        }))
    }

    /// expression-statement := expression? ';'
    fn expr_stmt(&mut self) -> Result<Node, CompileError> {
        if self.consume(";") {
            return Ok(self.node(NodeKind::Block(Vec::new())));
        }
        let expr = self.expr()?;
        self.skip(";")?;
        Ok(self.node(NodeKind::ExpressionStatement(Box::new(expr))))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// expression := assign (',' expression)?
    fn expr(&mut self) -> Result<Node, CompileError> {
        let lhs = self.assign()?;
        if self.consume(",") {
            let rhs = self.expr()?;
            return Ok(self.node(NodeKind::Comma {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }));
        }
        Ok(lhs)
    }

    /// assign := equality ('=' assign)?
    fn assign(&mut self) -> Result<Node, CompileError> {
        let lhs = self.equality()?;
        if self.consume("=") {
            let rhs = self.assign()?;
            let rhs_place = self.place(&rhs);
            let lhs_place = self.place(&lhs);
            self.quads
                .emit(":=", Some(rhs_place), None, Some(lhs_place));
            return Ok(self.node(NodeKind::Assignment {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }));
        }
        Ok(lhs)
    }

    /// equality := relational (('==' | '!=') relational)*
    fn equality(&mut self) -> Result<Node, CompileError> {
        let mut node = self.relational()?;
        loop {
            if self.consume("==") {
                let rhs = self.relational()?;
                node = self.binary(BinaryOp::Eq, node, rhs);
            } else if self.consume("!=") {
                let rhs = self.relational()?;
                node = self.binary(BinaryOp::Ne, node, rhs);
            } else {
                return Ok(node);
            }
        }
    }

    /// relational := add (('<' | '<=' | '>' | '>=') add)*
    ///
    /// `>` and `>=` become `<` and `<=` with the operands swapped.
    fn relational(&mut self) -> Result<Node, CompileError> {
        let mut node = self.add()?;
        loop {
            if self.consume("<") {
                let rhs = self.add()?;
                node = self.binary(BinaryOp::Lt, node, rhs);
            } else if self.consume("<=") {
                let rhs = self.add()?;
                node = self.binary(BinaryOp::Le, node, rhs);
            } else if self.consume(">") {
                let rhs = self.add()?;
                node = self.binary(BinaryOp::Lt, rhs, node);
            } else if self.consume(">=") {
                let rhs = self.add()?;
                node = self.binary(BinaryOp::Le, rhs, node);
            } else {
                return Ok(node);
            }
        }
    }

    /// add := mul (('+' | '-') mul)*
    fn add(&mut self) -> Result<Node, CompileError> {
        let mut node = self.mul()?;
        loop {
            if self.consume("+") {
                let rhs = self.mul()?;
                node = self.binary(BinaryOp::Add, node, rhs);
            } else if self.consume("-") {
                let rhs = self.mul()?;
                node = self.binary(BinaryOp::Sub, node, rhs);
            } else {
                return Ok(node);
            }
        }
    }

    /// mul := unary (('*' | '/') unary)*
    fn mul(&mut self) -> Result<Node, CompileError> {
        let mut node = self.unary()?;
        loop {
            if self.consume("*") {
                let rhs = self.unary()?;
                node = self.binary(BinaryOp::Mul, node, rhs);
            } else if self.consume("/") {
                let rhs = self.unary()?;
                node = self.binary(BinaryOp::Div, node, rhs);
            } else {
                return Ok(node);
            }
        }
    }

    /// Build a binary node and emit its quadruple.
    fn binary(&mut self, op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        let lhs_place = self.place(&lhs);
        let rhs_place = self.place(&rhs);
        let node = self.node(NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        });
        let result = self.temp_place(&node);
        self.quads
            .emit(op.symbol(), Some(lhs_place), Some(rhs_place), Some(result));
        node
    }

    /// unary := ('+' | '-' | '&' | '*') unary | 'sizeof' ... | postfix
    fn unary(&mut self) -> Result<Node, CompileError> {
        if self.consume("+") {
            return self.unary();
        }
        if self.consume("-") {
            let operand = self.unary()?;
            let place = self.place(&operand);
            let node = self.node(NodeKind::Negation(Box::new(operand)));
            let result = self.temp_place(&node);
            self.quads.emit("-", Some(place), None, Some(result));
            return Ok(node);
        }
        if self.consume("&") {
            let operand = self.unary()?;
            return Ok(self.node(NodeKind::AddressOf(Box::new(operand))));
        }
        if self.consume("*") {
            let operand = self.unary()?;
            return Ok(self.node(NodeKind::Dereference(Box::new(operand))));
        }
        if self.consume("sizeof") {
            return self.sizeof_expr();
        }
        self.postfix()
    }

    /// 'sizeof' (unary | '(' type abstract-declarator ')')
    ///
    /// Both forms fold to a number node at parse time.
    fn sizeof_expr(&mut self) -> Result<Node, CompileError> {
        if self.is("(") && self.peek_at(1).is_some_and(is_type_keyword) {
            self.advance();
            let base = self.declspec()?;
            let ty = self.abstract_declarator(base)?;
            self.skip(")")?;
            let node = self.node(NodeKind::Number(ty.size));
            let result = self.temp_place(&node);
            self.quads
                .emit("sizeof", Some(ty.to_string()), None, Some(result.clone()));
            self.places.insert(node.id, result);
            return Ok(node);
        }

        let mut operand = self.unary()?;
        add_type(&mut operand, &mut self.ids)?;
        let size = operand
            .ty
            .as_ref()
            .map(|ty| ty.size)
            .ok_or_else(|| CompileError::parse("expected an expression", "sizeof"))?;
        let place = self.place(&operand);
        let node = self.node(NodeKind::Number(size));
        let result = self.temp_place(&node);
        self.quads
            .emit("sizeof", Some(place), None, Some(result.clone()));
        self.places.insert(node.id, result);
        Ok(node)
    }

    /// postfix := primary ('[' expression ']' | '.' ident | '->' ident)*
    fn postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.primary()?;
        loop {
            if self.consume("[") {
                // a[b] is *(a + b)
                let index = self.expr()?;
                self.skip("]")?;
                let base_place = self.place(&node);
                let index_place = self.place(&index);
                let sum = self.node(NodeKind::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(node),
                    rhs: Box::new(index),
                });
                let deref = self.node(NodeKind::Dereference(Box::new(sum)));
                let result = self.temp_place(&deref);
                self.quads.emit(
                    "=[]",
                    Some(base_place),
                    Some(index_place),
                    Some(result.clone()),
                );
                self.places.insert(deref.id, result);
                node = deref;
                continue;
            }
            if self.consume(".") {
                node = self.member_access(node)?;
                continue;
            }
            if self.consume("->") {
                // p->name is (*p).name
                let deref = self.node(NodeKind::Dereference(Box::new(node)));
                node = self.member_access(deref)?;
                continue;
            }
            return Ok(node);
        }
    }

    /// Member lookup for `.`; the base must already be a struct or union.
    fn member_access(&mut self, mut base: Node) -> Result<Node, CompileError> {
        add_type(&mut base, &mut self.ids)?;
        let token = self.advance();
        if token.kind != TokenKind::Identifier {
            return Err(CompileError::parse("expected an identifier", token.text));
        }
        let base_ty = base
            .ty
            .as_ref()
            .ok_or_else(|| CompileError::type_error("member not found", token.text.clone()))?;
        let member = base_ty
            .find_member(&token.text)
            .cloned()
            .ok_or_else(|| {
                CompileError::type_error(
                    format!("member '{}' not found", token.text),
                    base_ty.to_string(),
                )
            })?;
        Ok(self.node(NodeKind::DotAccess {
            base: Box::new(base),
            member,
        }))
    }

    /// primary := '(' expression ')' | identifier | identifier '(' args ')'
    ///          | number | string
    fn primary(&mut self) -> Result<Node, CompileError> {
        if self.consume("(") {
            let expr = self.expr()?;
            self.skip(")")?;
            return Ok(expr);
        }

        let token = self.advance();
        match token.kind {
            TokenKind::NumericLiteral => Ok(self.node(NodeKind::Number(token.value))),
            TokenKind::StringLiteral => self.string_literal(token),
            TokenKind::Identifier => {
                if self.is("(") {
                    return self.funcall(token.text);
                }
                let var = self
                    .scopes
                    .find_entry(&token.text)
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::scope(format!("variable '{}' not defined", token.text))
                    })?;
                Ok(self.node(NodeKind::Variable(var)))
            }
            TokenKind::EndOfFile => Err(CompileError::parse("unexpected end of input", "")),
            _ => Err(CompileError::parse("expected an expression", token.text)),
        }
    }

    /// A string literal becomes an anonymous zero-terminated global of
    /// array-of-char type.
    fn string_literal(&mut self, token: Token) -> Result<Node, CompileError> {
        let bytes = token
            .str_bytes
            .ok_or_else(|| CompileError::parse("expected an expression", token.text))?;
        let ty = Type::array_of(Type::char_type(), bytes.len() as i64);
        let name = format!(".LC{}", self.string_count);
        self.string_count += 1;
        self.decls.push(Decl::Var(GlobalVar {
            name: name.clone(),
            ty: ty.clone(),
            init_data: Some(bytes),
        }));
        Ok(self.node(NodeKind::Variable(VarRef::Global { name, ty })))
    }

    /// Call arguments are parsed at assignment precedence; `arg`
    /// quadruples are emitted together, just before the call.
    fn funcall(&mut self, name: String) -> Result<Node, CompileError> {
        self.skip("(")?;
        let mut args = Vec::new();
        let mut arg_places = Vec::new();
        if !self.consume(")") {
            loop {
                let arg = self.assign()?;
                arg_places.push(self.place(&arg));
                args.push(arg);
                if self.consume(",") {
                    continue;
                }
                self.skip(")")?;
                break;
            }
        }

        let arg_count = args.len();
        let node = self.node(NodeKind::FunctionCall {
            name: name.clone(),
            args,
        });
        for place in arg_places {
            self.quads.emit("arg", Some(place), None, None);
        }
        let result = self.temp_place(&node);
        self.quads.emit(
            "call",
            Some(name),
            Some(arg_count.to_string()),
            Some(result),
        );
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> (Program, QuadBuffer) {
        let tokens = tokenize(source).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> CompileError {
        let tokens = tokenize(source).unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn main_body(program: &Program) -> &[Node] {
        let func = program.find_function("main").unwrap();
        let Some(Node {
            kind: NodeKind::Block(body),
            ..
        }) = &func.body
        else {
            panic!("expected a block body");
        };
        body
    }

    #[test]
    fn test_parse_return_constant() {
        let (program, _) = parse_source("int main(){return 42;}");
        let body = main_body(&program);
        assert_eq!(body.len(), 1);
        let NodeKind::Return(expr) = &body[0].kind else {
            panic!("expected a return");
        };
        assert_eq!(expr.kind, NodeKind::Number(42));
    }

    #[test]
    fn test_locals_are_allocated_in_order() {
        let (program, _) = parse_source("int main(){int a=3;int b=4;return a+b;}");
        let func = program.find_function("main").unwrap();
        let names: Vec<&str> = func.locals.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(func.param_count, 0);
    }

    #[test]
    fn test_parameters_come_before_body_locals() {
        let (program, _) = parse_source("int add(int x,int y){int z; return x+y;}");
        let func = program.find_function("add").unwrap();
        let names: Vec<&str> = func.locals.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(func.param_count, 2);
    }

    #[test]
    fn test_forward_declaration_has_no_body() {
        let (program, _) = parse_source("int add(int x,int y); int main(){return add(1,2);}");
        let funcs: Vec<&Function> = program.functions().collect();
        assert_eq!(funcs.len(), 2);
        assert!(!funcs[0].is_definition);
        assert!(funcs[0].body.is_none());
        assert!(funcs[1].is_definition);
    }

    #[test]
    fn test_greater_than_swaps_operands() {
        let (program, _) = parse_source("int main(){int a; int b; return a>b;}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        let NodeKind::Binary {
            op: BinaryOp::Lt,
            lhs,
            rhs,
        } = &expr.kind
        else {
            panic!("expected a < node");
        };
        // a > b parses as b < a
        let NodeKind::Variable(l) = &lhs.kind else {
            panic!("expected a variable");
        };
        let NodeKind::Variable(r) = &rhs.kind else {
            panic!("expected a variable");
        };
        assert_eq!(l.name(), "b");
        assert_eq!(r.name(), "a");
    }

    #[test]
    fn test_subscript_lowers_to_deref_of_sum() {
        let (program, _) = parse_source("int main(){int a[3]; return a[1];}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        let NodeKind::Dereference(sum) = &expr.kind else {
            panic!("expected a dereference");
        };
        // the index is scaled by sizeof(int) during decoration
        let NodeKind::Binary {
            op: BinaryOp::Add, ..
        } = &sum.kind
        else {
            panic!("expected an addition");
        };
        assert_eq!(expr.ty.as_ref().unwrap().kind, TypeKind::Int);
    }

    #[test]
    fn test_arrow_lowers_to_deref_member() {
        let (program, _) = parse_source(
            "struct S{int a;}; int main(){struct S s; struct S *p; p=&s; return p->a;}",
        );
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        let NodeKind::DotAccess { base, member } = &expr.kind else {
            panic!("expected a member access");
        };
        assert_eq!(member.name, "a");
        assert!(matches!(base.kind, NodeKind::Dereference(_)));
    }

    #[test]
    fn test_while_becomes_for_without_init() {
        let (program, _) = parse_source("int main(){int i; i=0; while(i<3) i=i+1; return i;}");
        let body = main_body(&program);
        let NodeKind::For {
            init,
            cond,
            increment,
            ..
        } = &body[2].kind
        else {
            panic!("expected a for node");
        };
        assert!(init.is_none());
        assert!(cond.is_some());
        assert!(increment.is_none());
    }

    #[test]
    fn test_sizeof_folds_to_number() {
        let (program, _) = parse_source("int main(){int *p; return sizeof(p) + sizeof(int);}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        let NodeKind::Binary { lhs, rhs, .. } = &expr.kind else {
            panic!("expected an addition");
        };
        assert_eq!(lhs.kind, NodeKind::Number(8));
        assert_eq!(rhs.kind, NodeKind::Number(4));
    }

    #[test]
    fn test_sizeof_array_type() {
        let (program, _) = parse_source("int main(){int a[3]; return sizeof(a);}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        assert_eq!(expr.kind, NodeKind::Number(12));
    }

    #[test]
    fn test_string_literal_becomes_global() {
        let (program, _) = parse_source("int main(){char *s; s=\"hi\"; return 0;}");
        let globals: Vec<&GlobalVar> = program.globals().collect();
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].name, ".LC0");
        assert_eq!(globals[0].init_data.as_deref(), Some(&[b'h', b'i', 0][..]));
        assert_eq!(globals[0].ty.kind, TypeKind::Array);
        assert_eq!(globals[0].ty.size, 3);
    }

    #[test]
    fn test_pointer_to_array_declarator() {
        let (program, _) = parse_source("int main(){int (*p)[3]; return sizeof(p);}");
        let func = program.find_function("main").unwrap();
        let ty = &func.locals[0].ty;
        assert_eq!(ty.kind, TypeKind::Pointer);
        assert_eq!(ty.base.as_ref().unwrap().kind, TypeKind::Array);
    }

    #[test]
    fn test_array_of_pointers_declarator() {
        let (program, _) = parse_source("int main(){int *p[3]; return sizeof(p);}");
        let func = program.find_function("main").unwrap();
        let ty = &func.locals[0].ty;
        assert_eq!(ty.kind, TypeKind::Array);
        assert_eq!(ty.base.as_ref().unwrap().kind, TypeKind::Pointer);
        assert_eq!(ty.size, 24);
    }

    #[test]
    fn test_tag_reference_resolves() {
        let (program, _) =
            parse_source("struct Point{int x; int y;}; int main(){struct Point p; p.x=1; return p.x;}");
        let func = program.find_function("main").unwrap();
        assert_eq!(func.locals[0].ty.kind, TypeKind::Struct);
        assert_eq!(func.locals[0].ty.size, 8);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let err = parse_err("int main(){struct Missing m; return 0;}");
        assert!(err.to_string().contains("tag 'Missing' not found"));
    }

    #[test]
    fn test_undefined_variable_fails() {
        let err = parse_err("int main(){return x;}");
        assert!(err.to_string().contains("variable 'x' not defined"));
    }

    #[test]
    fn test_void_variable_rejected() {
        let err = parse_err("int main(){void v; return 0;}");
        assert!(err.to_string().contains("variable cannot be of type void"));
    }

    #[test]
    fn test_invalid_array_size_rejected() {
        let err = parse_err("int main(){int a[x]; return 0;}");
        assert!(err.to_string().contains("invalid array size"));
    }

    #[test]
    fn test_unexpected_token_reports_expectation() {
        let err = parse_err("int main(){return 1:}");
        assert!(err.to_string().contains("expected ';'"));
    }

    #[test]
    fn test_unexpected_end_of_input() {
        let err = parse_err("int main(){return 1;");
        assert!(err.to_string().contains("unexpected end of input"));
    }

    #[test]
    fn test_shadowing_resolves_to_inner_local() {
        let (program, _) = parse_source("int x; int main(){int x; x=1; return x;}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        assert!(matches!(
            &expr.kind,
            NodeKind::Variable(VarRef::Local { .. })
        ));
    }

    #[test]
    fn test_global_scope_resolution() {
        let (program, _) = parse_source("int counter; int main(){counter=5; return counter;}");
        let globals: Vec<&GlobalVar> = program.globals().collect();
        assert_eq!(globals[0].name, "counter");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        assert!(matches!(
            &expr.kind,
            NodeKind::Variable(VarRef::Global { .. })
        ));
    }

    #[test]
    fn test_comma_expression() {
        let (program, _) = parse_source("int main(){int a; int b; return (a=1, b=2, a+b);}");
        let body = main_body(&program);
        let NodeKind::Return(expr) = &body.last().unwrap().kind else {
            panic!("expected a return");
        };
        assert!(matches!(expr.kind, NodeKind::Comma { .. }));
    }

    #[test]
    fn test_quads_for_assignment_and_arithmetic() {
        let (_, quads) = parse_source("int main(){int a=3;int b=4;return a+b;}");
        let listing = quads.format_listing();
        assert!(listing.contains("declare"));
        assert!(listing.contains(":="));
        assert!(listing.contains("return"));
        let ops: Vec<&str> = quads.codes().iter().map(|q| q.op.as_str()).collect();
        assert_eq!(
            ops,
            vec!["begin", "declare", ":=", "declare", ":=", "+", "return"]
        );
    }

    #[test]
    fn test_quads_for_call() {
        let (_, quads) = parse_source("int main(){return add(3,4);} int add(int x,int y){return x+y;}");
        let ops: Vec<&str> = quads.codes().iter().map(|q| q.op.as_str()).collect();
        assert_eq!(
            ops,
            vec![
                "begin", "arg", "arg", "call", "return", "begin", "param", "param", "+", "return"
            ]
        );
        let call = &quads.codes()[3];
        assert_eq!(call.arg1.as_deref(), Some("add"));
        assert_eq!(call.arg2.as_deref(), Some("2"));
    }

    #[test]
    fn test_quads_for_if_are_backpatched() {
        let (_, quads) = parse_source("int main(){if(1){return 2;} return 3;}");
        // 100 begin, 101 j=, 102 return, 103 return
        let jump = &quads.codes()[1];
        assert_eq!(jump.op, "j=");
        assert_eq!(jump.arg2.as_deref(), Some("0"));
        assert_eq!(jump.result.as_deref(), Some("103"));
    }

    #[test]
    fn test_quads_for_loop_jump_back() {
        let (_, quads) = parse_source("int main(){int i; for(i=0;i<3;i=i+1){} return i;}");
        let jump_back = quads
            .codes()
            .iter()
            .find(|q| q.op == "j")
            .expect("loop should emit an unconditional jump");
        // the backward jump targets the condition's address
        let target: usize = jump_back.result.as_deref().unwrap().parse().unwrap();
        assert!(target >= crate::tac::START_ADDRESS);
        assert!(target < quads.next_address());
    }

    #[test]
    fn test_quad_addresses_contiguous_from_100() {
        let (_, quads) = parse_source("int main(){int s=0; int i; for(i=0;i<5;i=i+1){s=s+i;} return s;}");
        assert_eq!(quads.next_address(), 100 + quads.len());
        // all backpatched targets point at emitted addresses
        for quad in quads.codes() {
            if quad.op == "j" || quad.op == "j=" {
                let target: usize = quad.result.as_deref().unwrap().parse().unwrap();
                assert!((100..100 + quads.len() + 1).contains(&target));
            }
        }
    }
}
