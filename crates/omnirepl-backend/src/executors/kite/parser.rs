//! Recursive-descent parser.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! stmt  := ("set" | "let") NAME "=" expr | NAME "=" expr
//!        | ("print" | "eprint") [expr ("," expr)*]
//!        | "fn" NAME "(" params ")" ("=" expr | block)
//!        | "import" NAME | "del" NAME | "return" [expr]
//!        | "if" expr block ["else" (block | if)] | "while" expr block
//!        | expr
//! expr  := or;  or := and ("or" and)*;  and := not ("and" not)*
//! not   := "not" not | cmp;  cmp := sum [cmpop sum]
//! sum   := term (("+" | "-") term)*;  term := unary (("*" | "/" | "//" | "%") unary)*
//! unary := "-" unary | postfix;  postfix := atom ("(" args ")" | "." NAME | "[" expr "]")*
//! ```
//!
//! Expression trees taller than [`MAX_DEPTH`] and blocks nested deeper than it
//! are syntax errors, so evaluation never recurses without bound.

use super::ast::{BinOp, Expr, FunctionDef, Stmt, UnaryOp};
use super::error::{KiteError, KiteResult};
use super::lexer::{is_keyword, tokenize, Sym, Tok, Token};

/// What a piece of source turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A single expression whose value is echoed.
    Expression(Expr),
    Program(Vec<Stmt>),
}

/// Parse `source` as one expression first and as a statement sequence only if
/// that is a syntax error.
pub fn parse_source(source: &str) -> KiteResult<Parsed> {
    let tokens = tokenize(source)?;
    if let Ok(expr) = Parser::new(tokens.clone()).expression_only() {
        return Ok(Parsed::Expression(expr));
    }
    Parser::new(tokens).program().map(Parsed::Program)
}

pub fn parse_program(source: &str) -> KiteResult<Vec<Stmt>> {
    Parser::new(tokenize(source)?).program()
}

/// Tallest expression tree, and deepest block nesting, the parser accepts.
pub const MAX_DEPTH: usize = 200;

/// A parsed expression and the height of its tree.
struct Node {
    expr: Expr,
    height: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Self { expr, height: 1 }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    function_depth: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            function_depth: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_sym(&self, sym: Sym) -> bool {
        matches!(self.peek(), Tok::Sym(s) if *s == sym)
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Name(name) if name == word)
    }

    fn eat_sym(&mut self, sym: Sym) -> bool {
        if self.at_sym(sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: Sym, what: &str) -> KiteResult<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> KiteError {
        let found = match self.peek() {
            Tok::Int(n) => n.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(s) => format!("'{}'", s),
            Tok::Name(name) => format!("'{}'", name),
            Tok::Sym(sym) => format!("{:?}", sym),
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        KiteError::syntax(self.line(), format!("expected {}, found {}", expected, found))
    }

    fn too_deep(&self, what: &str) -> KiteError {
        KiteError::syntax(self.line(), format!("{} nested too deeply", what))
    }

    /// Run `parse` one recursion level deeper.
    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> KiteResult<T>,
    ) -> KiteResult<T> {
        if self.nesting >= MAX_DEPTH {
            return Err(self.too_deep(what));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn node(&self, expr: Expr, height: usize) -> KiteResult<Node> {
        if height > MAX_DEPTH {
            return Err(self.too_deep("expression"));
        }
        Ok(Node { expr, height })
    }

    fn join(
        &self,
        left: Node,
        right: Node,
        build: impl FnOnce(Box<Expr>, Box<Expr>) -> Expr,
    ) -> KiteResult<Node> {
        let height = left.height.max(right.height) + 1;
        self.node(build(Box::new(left.expr), Box::new(right.expr)), height)
    }

    fn identifier(&mut self, what: &str) -> KiteResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !is_keyword(&name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn at_separator(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Sym(Sym::Semi))
    }

    fn skip_separators(&mut self) {
        while self.at_separator() {
            self.advance();
        }
    }

    fn expression_only(&mut self) -> KiteResult<Expr> {
        self.skip_separators();
        let expr = self.expr()?;
        self.skip_separators();
        if *self.peek() != Tok::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn program(&mut self) -> KiteResult<Vec<Stmt>> {
        let body = self.statements(|tok| *tok == Tok::Eof)?;
        if *self.peek() != Tok::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(body)
    }

    /// Statements separated by newlines or `;` until `done` matches.
    fn statements(&mut self, done: impl Fn(&Tok) -> bool) -> KiteResult<Vec<Stmt>> {
        let mut body = Vec::new();
        self.skip_separators();
        while !done(self.peek()) && *self.peek() != Tok::Eof {
            body.push(self.statement()?);
            if done(self.peek()) || *self.peek() == Tok::Eof {
                break;
            }
            if !self.at_separator() {
                return Err(self.unexpected("end of statement"));
            }
            self.skip_separators();
        }
        Ok(body)
    }

    fn block(&mut self) -> KiteResult<Vec<Stmt>> {
        self.expect_sym(Sym::LBrace, "'{'")?;
        let body = self.nested("blocks", |p| {
            p.statements(|tok| matches!(tok, Tok::Sym(Sym::RBrace)))
        })?;
        self.expect_sym(Sym::RBrace, "'}'")?;
        Ok(body)
    }

    fn statement(&mut self) -> KiteResult<Stmt> {
        if self.eat_word("set") || self.eat_word("let") {
            let name = self.identifier("variable name")?;
            self.expect_sym(Sym::Assign, "'='")?;
            let value = self.expr()?;
            return Ok(Stmt::Assign { name, value });
        }

        if self.at_word("print") || self.at_word("eprint") {
            let stderr = self.at_word("eprint");
            self.advance();
            let mut args = Vec::new();
            if !self.at_separator() && !matches!(self.peek(), Tok::Eof | Tok::Sym(Sym::RBrace)) {
                args.push(self.expr()?);
                while self.eat_sym(Sym::Comma) {
                    args.push(self.expr()?);
                }
            }
            return Ok(Stmt::Print { args, stderr });
        }

        if self.eat_word("fn") {
            return self.function();
        }

        if self.eat_word("import") {
            return Ok(Stmt::Import(self.identifier("module name")?));
        }

        if self.eat_word("del") {
            return Ok(Stmt::Del(self.identifier("variable name")?));
        }

        if self.at_word("return") {
            if self.function_depth == 0 {
                return Err(KiteError::syntax(self.line(), "'return' outside function"));
            }
            self.advance();
            if self.at_separator() || matches!(self.peek(), Tok::Eof | Tok::Sym(Sym::RBrace)) {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.expr()?)));
        }

        if self.eat_word("if") {
            return self.if_statement();
        }

        if self.eat_word("while") {
            let cond = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::While { cond, body });
        }

        if matches!(self.peek_at(1), Tok::Sym(Sym::Assign)) {
            if let Tok::Name(name) = self.peek().clone() {
                if !is_keyword(&name) {
                    self.advance();
                    self.advance();
                    let value = self.expr()?;
                    return Ok(Stmt::Assign { name, value });
                }
            }
        }

        Ok(Stmt::Expr(self.expr()?))
    }

    fn function(&mut self) -> KiteResult<Stmt> {
        let name = self.identifier("function name")?;
        self.expect_sym(Sym::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at_sym(Sym::RParen) {
            loop {
                let param = self.identifier("parameter name")?;
                if params.contains(&param) {
                    return Err(KiteError::syntax(
                        self.line(),
                        format!("duplicate parameter '{}'", param),
                    ));
                }
                params.push(param);
                if !self.eat_sym(Sym::Comma) {
                    break;
                }
            }
        }
        self.expect_sym(Sym::RParen, "')'")?;

        self.function_depth += 1;
        let body = if self.eat_sym(Sym::Assign) {
            self.expr().map(|expr| vec![Stmt::Return(Some(expr))])
        } else {
            self.block()
        };
        self.function_depth -= 1;

        Ok(Stmt::FnDef(FunctionDef {
            name,
            params,
            body: body?,
        }))
    }

    fn if_statement(&mut self) -> KiteResult<Stmt> {
        let cond = self.expr()?;
        let then_body = self.block()?;

        // `else` may start on the next line.
        let save = self.pos;
        while *self.peek() == Tok::Newline {
            self.advance();
        }
        let else_body = if self.eat_word("else") {
            if self.eat_word("if") {
                vec![self.nested("blocks", Self::if_statement)?]
            } else {
                self.block()?
            }
        } else {
            self.pos = save;
            Vec::new()
        };

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn expr(&mut self) -> KiteResult<Expr> {
        self.or_expr().map(|node| node.expr)
    }

    fn or_expr(&mut self) -> KiteResult<Node> {
        let mut left = self.and_expr()?;
        while self.eat_word("or") {
            let right = self.and_expr()?;
            left = self.join(left, right, |left, right| Expr::Or { left, right })?;
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> KiteResult<Node> {
        let mut left = self.not_expr()?;
        while self.eat_word("and") {
            let right = self.not_expr()?;
            left = self.join(left, right, |left, right| Expr::And { left, right })?;
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> KiteResult<Node> {
        if self.eat_word("not") {
            let operand = self.nested("expression", Self::not_expr)?;
            return self.node(
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand.expr),
                },
                operand.height + 1,
            );
        }
        self.comparison()
    }

    fn comparison(&mut self) -> KiteResult<Node> {
        let left = self.sum()?;
        let op = match self.peek() {
            Tok::Sym(Sym::Eq) => BinOp::Eq,
            Tok::Sym(Sym::Ne) => BinOp::Ne,
            Tok::Sym(Sym::Lt) => BinOp::Lt,
            Tok::Sym(Sym::Le) => BinOp::Le,
            Tok::Sym(Sym::Gt) => BinOp::Gt,
            Tok::Sym(Sym::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.sum()?;
        self.join(left, right, |left, right| Expr::Binary { op, left, right })
    }

    fn sum(&mut self) -> KiteResult<Node> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Sym(Sym::Plus) => BinOp::Add,
                Tok::Sym(Sym::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = self.join(left, right, |left, right| Expr::Binary { op, left, right })?;
        }
    }

    fn term(&mut self) -> KiteResult<Node> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Sym(Sym::Star) => BinOp::Mul,
                Tok::Sym(Sym::Slash) => BinOp::Div,
                Tok::Sym(Sym::SlashSlash) => BinOp::FloorDiv,
                Tok::Sym(Sym::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = self.join(left, right, |left, right| Expr::Binary { op, left, right })?;
        }
    }

    fn unary(&mut self) -> KiteResult<Node> {
        if self.eat_sym(Sym::Minus) {
            let operand = self.nested("expression", Self::unary)?;
            return self.node(
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand.expr),
                },
                operand.height + 1,
            );
        }
        self.postfix()
    }

    fn postfix(&mut self) -> KiteResult<Node> {
        let mut node = self.atom()?;
        loop {
            if self.eat_sym(Sym::LParen) {
                let (args, height) = self.nested("expression", |p| p.comma_list(Sym::RParen))?;
                node = self.node(
                    Expr::Call {
                        callee: Box::new(node.expr),
                        args,
                    },
                    node.height.max(height) + 1,
                )?;
            } else if self.eat_sym(Sym::Dot) {
                let name = self.identifier("attribute name")?;
                node = self.node(
                    Expr::Attr {
                        object: Box::new(node.expr),
                        name,
                    },
                    node.height + 1,
                )?;
            } else if self.eat_sym(Sym::LBracket) {
                let index = self.nested("expression", Self::or_expr)?;
                self.expect_sym(Sym::RBracket, "']'")?;
                node = self.join(node, index, |object, index| Expr::Index { object, index })?;
            } else {
                return Ok(node);
            }
        }
    }

    /// Items up to `close`, with the height of the tallest one.
    fn comma_list(&mut self, close: Sym) -> KiteResult<(Vec<Expr>, usize)> {
        let mut items = Vec::new();
        let mut height = 0;
        while !self.at_sym(close) {
            let item = self.or_expr()?;
            height = height.max(item.height);
            items.push(item.expr);
            if !self.eat_sym(Sym::Comma) {
                break;
            }
        }
        self.expect_sym(close, if close == Sym::RParen { "')'" } else { "']'" })?;
        Ok((items, height))
    }

    fn atom(&mut self) -> KiteResult<Node> {
        match self.peek().clone() {
            Tok::Int(n) => {
                self.advance();
                Ok(Node::leaf(Expr::Int(n)))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Node::leaf(Expr::Float(f)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Node::leaf(Expr::Str(s)))
            }
            Tok::Name(name) => match name.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Node::leaf(Expr::Bool(name == "true")))
                }
                "nil" => {
                    self.advance();
                    Ok(Node::leaf(Expr::Nil))
                }
                word if is_keyword(word) => Err(self.unexpected("expression")),
                _ => {
                    self.advance();
                    Ok(Node::leaf(Expr::Name(name)))
                }
            },
            Tok::Sym(Sym::LParen) => {
                self.advance();
                let node = self.nested("expression", Self::or_expr)?;
                self.expect_sym(Sym::RParen, "')'")?;
                Ok(node)
            }
            Tok::Sym(Sym::LBracket) => {
                self.advance();
                let (items, height) = self.nested("expression", |p| p.comma_list(Sym::RBracket))?;
                self.node(Expr::List(items), height + 1)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}
