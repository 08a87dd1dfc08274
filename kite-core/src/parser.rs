//! Recursive-descent parser with precedence climbing for expressions.
//!
//! The parser never gives up on a unit. A failed production reports one
//! diagnostic and unwinds to the nearest recovery point (statement, match
//! arm or top-level declaration), which skips tokens until a
//! synchronization token and resumes.
//!
//! Generic arguments: in type position `<` always opens an argument list.
//! In expression position `<` is always the less-than operator and explicit
//! arguments are written with the turbofish `path::<T>`, recognised with a
//! single token of lookahead after `::`.

use tracing::trace;

use crate::ast::*;
use crate::diagnostic::{Category, Diagnostic};
use crate::lexer::{LexResult, LiteralValue, Token, TokenKind, lex};
use crate::span::{FileId, Span};

/// Default bound on syntactic nesting.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Everything the front end knows about one unit before type checking.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub file: FileId,
    /// All tokens including comment trivia, for the formatter.
    pub tokens: Vec<Token>,
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

/// A REPL submission: declarations, statements and an optional trailing
/// expression whose value is the result.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub items: Vec<Item>,
    pub stmts: Vec<Stmt>,
    pub tail: Option<Expr>,
}

/// Lex and parse one unit.
pub fn parse_unit(file: FileId, source: &str, max_depth: usize) -> ParsedUnit {
    let LexResult {
        tokens,
        mut diagnostics,
    } = lex(file, source);
    let mut parser = Parser::new(file, source, &tokens, max_depth);
    let module = parser.parse_module();
    trace!(unit = %file, tokens = tokens.len(), items = module.items.len(), "parsed unit");
    diagnostics.append(&mut parser.diagnostics);
    ParsedUnit {
        file,
        tokens,
        module,
        diagnostics,
    }
}

pub fn parse_fragment(file: FileId, source: &str, max_depth: usize) -> (Fragment, Vec<Diagnostic>) {
    let LexResult {
        tokens,
        mut diagnostics,
    } = lex(file, source);
    let mut parser = Parser::new(file, source, &tokens, max_depth);
    let fragment = parser.parse_fragment();
    diagnostics.append(&mut parser.diagnostics);
    (fragment, diagnostics)
}

/// Parse a standalone expression; used by tests and tooling.
pub fn parse_expression(file: FileId, source: &str, max_depth: usize) -> (Option<Expr>, Vec<Diagnostic>) {
    let LexResult {
        tokens,
        mut diagnostics,
    } = lex(file, source);
    let mut parser = Parser::new(file, source, &tokens, max_depth);
    let expr = parser.parse_expr().ok();
    if expr.is_some() && !parser.at(TokenKind::Eof) {
        parser.error_expected("end of input");
    }
    diagnostics.append(&mut parser.diagnostics);
    (expr, diagnostics)
}

/// Marker for a production that already reported its diagnostic.
#[derive(Debug)]
struct Abort;

type PResult<T> = Result<T, Abort>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
    None,
}

const PREFIX_BP: u8 = 140;
const CAST_BP: u8 = 130;

enum Infix {
    Binary(BinaryOp),
    Assign(Option<BinaryOp>),
    Range { inclusive: bool },
}

/// Binding level (1 = loosest) and associativity of an infix token.
fn infix_info(kind: TokenKind) -> Option<(Infix, u8, Assoc)> {
    use TokenKind as T;
    let info = match kind {
        T::Eq => (Infix::Assign(None), 1, Assoc::Right),
        T::PlusEq => (Infix::Assign(Some(BinaryOp::Add)), 1, Assoc::Right),
        T::MinusEq => (Infix::Assign(Some(BinaryOp::Sub)), 1, Assoc::Right),
        T::StarEq => (Infix::Assign(Some(BinaryOp::Mul)), 1, Assoc::Right),
        T::SlashEq => (Infix::Assign(Some(BinaryOp::Div)), 1, Assoc::Right),
        T::PercentEq => (Infix::Assign(Some(BinaryOp::Rem)), 1, Assoc::Right),
        T::AmpEq => (Infix::Assign(Some(BinaryOp::BitAnd)), 1, Assoc::Right),
        T::PipeEq => (Infix::Assign(Some(BinaryOp::BitOr)), 1, Assoc::Right),
        T::CaretEq => (Infix::Assign(Some(BinaryOp::BitXor)), 1, Assoc::Right),
        T::ShlEq => (Infix::Assign(Some(BinaryOp::Shl)), 1, Assoc::Right),
        T::ShrEq => (Infix::Assign(Some(BinaryOp::Shr)), 1, Assoc::Right),
        T::DotDot => (Infix::Range { inclusive: false }, 2, Assoc::None),
        T::DotDotEq => (Infix::Range { inclusive: true }, 2, Assoc::None),
        T::PipePipe => (Infix::Binary(BinaryOp::Or), 3, Assoc::Left),
        T::AmpAmp => (Infix::Binary(BinaryOp::And), 4, Assoc::Left),
        T::EqEq => (Infix::Binary(BinaryOp::Eq), 5, Assoc::None),
        T::BangEq => (Infix::Binary(BinaryOp::Ne), 5, Assoc::None),
        T::Lt => (Infix::Binary(BinaryOp::Lt), 6, Assoc::None),
        T::LtEq => (Infix::Binary(BinaryOp::Le), 6, Assoc::None),
        T::Gt => (Infix::Binary(BinaryOp::Gt), 6, Assoc::None),
        T::GtEq => (Infix::Binary(BinaryOp::Ge), 6, Assoc::None),
        T::Pipe => (Infix::Binary(BinaryOp::BitOr), 7, Assoc::Left),
        T::Caret => (Infix::Binary(BinaryOp::BitXor), 8, Assoc::Left),
        T::Amp => (Infix::Binary(BinaryOp::BitAnd), 9, Assoc::Left),
        T::Shl => (Infix::Binary(BinaryOp::Shl), 10, Assoc::Left),
        T::Shr => (Infix::Binary(BinaryOp::Shr), 10, Assoc::Left),
        T::Plus => (Infix::Binary(BinaryOp::Add), 11, Assoc::Left),
        T::Minus => (Infix::Binary(BinaryOp::Sub), 11, Assoc::Left),
        T::Star => (Infix::Binary(BinaryOp::Mul), 12, Assoc::Left),
        T::Slash => (Infix::Binary(BinaryOp::Div), 12, Assoc::Left),
        T::Percent => (Infix::Binary(BinaryOp::Rem), 12, Assoc::Left),
        _ => return None,
    };
    Some(info)
}

fn is_item_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Function
            | TokenKind::Struct
            | TokenKind::Class
            | TokenKind::Enum
            | TokenKind::Trait
            | TokenKind::Impl
            | TokenKind::Import
            | TokenKind::Const
            | TokenKind::Static
            | TokenKind::Extern
            | TokenKind::Comptime
    )
}

fn is_stmt_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Let
            | TokenKind::While
            | TokenKind::For
            | TokenKind::Loop
            | TokenKind::Return
            | TokenKind::Defer
            | TokenKind::If
            | TokenKind::Match
            | TokenKind::Break
            | TokenKind::Continue
    )
}

struct Parser<'src> {
    file: FileId,
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: usize,
    max_depth: usize,
    depth_reported: bool,
    next_id: u32,
}

impl<'src> Parser<'src> {
    fn new(file: FileId, source: &'src str, tokens: &[Token], max_depth: usize) -> Self {
        let tokens: Vec<Token> = tokens.iter().filter(|t| !t.kind.is_trivia()).cloned().collect();
        Parser {
            file,
            source,
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
            max_depth,
            depth_reported: false,
            // 0 is the module root
            next_id: 1,
        }
    }

    // -----------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> TokenKind {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + n).min(last)].kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            self.error_expected(what);
            Err(Abort)
        }
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn finish(&self, start: Span) -> Span {
        start.to(self.prev_span())
    }

    fn new_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn error(&mut self, span: Span, message: impl Into<String>, code: &'static str) {
        self.diagnostics
            .push(Diagnostic::error(Category::Syntax, message, span).with_code(code));
    }

    fn error_expected(&mut self, what: &str) {
        let token = self.peek().clone();
        // the lexer already reported invalid tokens
        if token.kind == TokenKind::Error {
            return;
        }
        let found = match token.kind {
            TokenKind::Ident => format!("identifier `{}`", token.text(self.source)),
            kind if kind.is_keyword() => format!("keyword `{}`", kind.describe()),
            TokenKind::Eof => "end of input".to_string(),
            kind => format!("`{}`", kind.describe()),
        };
        self.error(token.span, format!("expected {what}, found {found}"), "E0100");
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            if !self.depth_reported {
                self.depth_reported = true;
                let span = self.peek().span;
                self.error(
                    span,
                    format!("expression too deeply nested (limit is {})", self.max_depth),
                    "E0110",
                );
            }
            return Err(Abort);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn ident(&mut self, what: &str) -> PResult<Ident> {
        let token = self.expect(TokenKind::Ident, what)?;
        Ok(Ident {
            name: token.text(self.source).to_string(),
            span: token.span,
        })
    }

    /// Consume a closing `>` of a generic list, splitting `>>`, `>=` and `>>=`.
    fn expect_closing_angle(&mut self) -> PResult<()> {
        let rest = match self.peek_kind() {
            TokenKind::Gt => {
                self.bump();
                return Ok(());
            }
            TokenKind::Shr => TokenKind::Gt,
            TokenKind::GtEq => TokenKind::Eq,
            TokenKind::ShrEq => TokenKind::GtEq,
            _ => {
                self.error_expected("`>`");
                return Err(Abort);
            }
        };
        let token = &mut self.tokens[self.pos];
        token.kind = rest;
        token.span.start += 1;
        token.span.column += 1;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------

    fn synchronize_item(&mut self) {
        let mut depth = 0usize;
        let mut moved = false;
        loop {
            let kind = self.peek_kind();
            if kind == TokenKind::Eof {
                return;
            }
            if depth == 0 && moved && is_item_start(kind) {
                return;
            }
            match kind {
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            self.bump();
            moved = true;
        }
    }

    /// Skip to the end of the current statement without leaving the block.
    fn synchronize_stmt(&mut self) {
        self.depth_reported = false;
        let mut depth = 0usize;
        let mut moved = false;
        loop {
            let kind = self.peek_kind();
            match kind {
                TokenKind::Eof => return,
                TokenKind::Semi if depth == 0 => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace if depth == 0 => return,
                _ if depth == 0 && moved && (is_stmt_start(kind) || is_item_start(kind)) => return,
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            self.bump();
            moved = true;
        }
    }

    fn synchronize_arm(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Comma if depth == 0 => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            self.bump();
        }
    }

    // -----------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------

    fn parse_module(&mut self) -> Module {
        let start = self.peek().span;
        let mut items = Vec::new();
        while !self.at(TokenKind::Eof) {
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(Abort) => self.synchronize_item(),
            }
        }
        Module {
            file: self.file,
            items,
            span: start.to(self.peek().span),
        }
    }

    fn parse_fragment(&mut self) -> Fragment {
        let mut fragment = Fragment {
            items: Vec::new(),
            stmts: Vec::new(),
            tail: None,
        };
        while !self.at(TokenKind::Eof) {
            let starts_item = is_item_start(self.peek_kind())
                && !(self.at(TokenKind::Comptime)
                    && matches!(self.nth_kind(1), TokenKind::If | TokenKind::Assert));
            if starts_item {
                match self.parse_item() {
                    Ok(item) => fragment.items.push(item),
                    Err(Abort) => self.synchronize_item(),
                }
                continue;
            }
            if self.eat(TokenKind::Semi) {
                continue;
            }
            match self.parse_stmt(TokenKind::Eof) {
                Ok(StmtOrTail::Stmt(stmt)) => fragment.stmts.push(stmt),
                Ok(StmtOrTail::Tail(expr)) => fragment.tail = Some(expr),
                Err(Abort) => self.synchronize_stmt(),
            }
        }
        fragment
    }

    fn parse_item(&mut self) -> PResult<Item> {
        let start = self.peek().span;
        let id = self.new_id();
        let kind = match self.peek_kind() {
            TokenKind::Import => self.parse_import()?,
            TokenKind::Function => ItemKind::Function(self.parse_function(false, false)?),
            TokenKind::Comptime => match self.nth_kind(1) {
                TokenKind::Function => {
                    self.bump();
                    ItemKind::Function(self.parse_function(true, false)?)
                }
                TokenKind::Assert => {
                    self.bump();
                    let decl = self.parse_assert()?;
                    self.expect(TokenKind::Semi, "`;`")?;
                    ItemKind::Assert(decl)
                }
                _ => {
                    self.bump();
                    self.error_expected("`function` or `assert` after `comptime`");
                    return Err(Abort);
                }
            },
            TokenKind::Extern => {
                self.bump();
                ItemKind::Function(self.parse_function(false, true)?)
            }
            TokenKind::Struct | TokenKind::Class => ItemKind::Struct(self.parse_struct()?),
            TokenKind::Enum => ItemKind::Enum(self.parse_enum()?),
            TokenKind::Trait => ItemKind::Trait(self.parse_trait()?),
            TokenKind::Impl => ItemKind::Impl(self.parse_impl()?),
            TokenKind::Const => ItemKind::Const(self.parse_const()?),
            TokenKind::Static => ItemKind::Static(self.parse_static()?),
            _ => {
                self.error_expected("a declaration");
                return Err(Abort);
            }
        };
        Ok(Item {
            id,
            kind,
            span: self.finish(start),
        })
    }

    fn parse_import(&mut self) -> PResult<ItemKind> {
        self.expect(TokenKind::Import, "`import`")?;
        let module = self.ident("a unit name")?;
        let alias = if self.eat(TokenKind::As) {
            Some(self.ident("an alias")?)
        } else {
            None
        };
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(ItemKind::Import(ImportDecl { module, alias }))
    }

    fn parse_function(&mut self, is_comptime: bool, is_extern: bool) -> PResult<FunctionDecl> {
        let start = self.peek().span;
        self.expect(TokenKind::Function, "`function`")?;
        let id = self.new_id();
        let name = self.ident("a function name")?;
        let generics = self.parse_generic_params()?;

        self.expect(TokenKind::LParen, "`(`")?;
        let mut receiver = None;
        if self.at(TokenKind::This) {
            let span = self.bump().span;
            receiver = Some((Receiver::View, span));
        } else if self.at(TokenKind::Mut) && self.nth_kind(1) == TokenKind::This {
            let mut_span = self.bump().span;
            let this_span = self.bump().span;
            receiver = Some((Receiver::Mutable, mut_span.to(this_span)));
        }
        if receiver.is_some() && !self.at(TokenKind::RParen) {
            self.expect(TokenKind::Comma, "`,` or `)`")?;
        }

        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let param_start = self.peek().span;
            let mutable = self.eat(TokenKind::Mut);
            let param_name = self.ident("a parameter name")?;
            self.expect(TokenKind::Colon, "`:`")?;
            let ty = self.parse_type()?;
            params.push(Param {
                id: self.new_id(),
                name: param_name,
                mutable,
                ty,
                span: self.finish(param_start),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;

        let ret = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = if self.at(TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else if self.eat(TokenKind::FatArrow) {
            let expr = self.parse_expr()?;
            self.expect(TokenKind::Semi, "`;`")?;
            FunctionBody::Expr(expr)
        } else if self.eat(TokenKind::Semi) {
            FunctionBody::None
        } else {
            self.error_expected("a function body");
            return Err(Abort);
        };

        Ok(FunctionDecl {
            id,
            name,
            generics,
            receiver,
            params,
            ret,
            body,
            is_comptime,
            is_extern,
            span: self.finish(start),
        })
    }

    fn parse_generic_params(&mut self) -> PResult<Vec<GenericParam>> {
        let mut generics = Vec::new();
        if !self.eat(TokenKind::Lt) {
            return Ok(generics);
        }
        loop {
            if matches!(self.peek_kind(), TokenKind::Gt | TokenKind::Shr) {
                break;
            }
            let id = self.new_id();
            if self.eat(TokenKind::Const) {
                let name = self.ident("a const parameter name")?;
                self.expect(TokenKind::Colon, "`:`")?;
                let ty = self.parse_type()?;
                generics.push(GenericParam {
                    id,
                    name,
                    kind: GenericParamKind::Const { ty },
                });
            } else {
                let name = self.ident("a type parameter name")?;
                let mut bounds = Vec::new();
                if self.eat(TokenKind::Colon) {
                    loop {
                        bounds.push(self.parse_path_type()?);
                        if !self.eat(TokenKind::Plus) {
                            break;
                        }
                    }
                }
                generics.push(GenericParam {
                    id,
                    name,
                    kind: GenericParamKind::Type { bounds },
                });
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_closing_angle()?;
        Ok(generics)
    }

    fn parse_methods_and_fields(
        &mut self,
        fields: &mut Vec<FieldDecl>,
        methods: &mut Vec<FunctionDecl>,
    ) -> PResult<()> {
        self.expect(TokenKind::LBrace, "`{`")?;
        while !self.at(TokenKind::RBrace) {
            match self.peek_kind() {
                TokenKind::Function => methods.push(self.parse_function(false, false)?),
                TokenKind::Comptime if self.nth_kind(1) == TokenKind::Function => {
                    self.bump();
                    methods.push(self.parse_function(true, false)?);
                }
                TokenKind::Ident => {
                    let start = self.peek().span;
                    let name = self.ident("a field name")?;
                    self.expect(TokenKind::Colon, "`:`")?;
                    let ty = self.parse_type()?;
                    fields.push(FieldDecl {
                        id: self.new_id(),
                        name,
                        ty,
                        span: self.finish(start),
                    });
                    if !self.eat(TokenKind::Comma) && !self.eat(TokenKind::Semi) && !self.at(TokenKind::RBrace)
                    {
                        if !matches!(self.peek_kind(), TokenKind::Function | TokenKind::Comptime) {
                            self.error_expected("`,`");
                            return Err(Abort);
                        }
                    }
                }
                _ => {
                    self.error_expected("a field or method");
                    return Err(Abort);
                }
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(())
    }

    fn parse_struct(&mut self) -> PResult<StructDecl> {
        let is_class = self.bump().kind == TokenKind::Class;
        let name = self.ident("a type name")?;
        let generics = self.parse_generic_params()?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        self.parse_methods_and_fields(&mut fields, &mut methods)?;
        Ok(StructDecl {
            name,
            generics,
            fields,
            methods,
            is_class,
        })
    }

    fn parse_enum(&mut self) -> PResult<EnumDecl> {
        self.expect(TokenKind::Enum, "`enum`")?;
        let name = self.ident("an enum name")?;
        let generics = self.parse_generic_params()?;
        let repr = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut variants = Vec::new();
        let mut methods = Vec::new();
        while !self.at(TokenKind::RBrace) {
            match self.peek_kind() {
                TokenKind::Function => methods.push(self.parse_function(false, false)?),
                TokenKind::Comptime if self.nth_kind(1) == TokenKind::Function => {
                    self.bump();
                    methods.push(self.parse_function(true, false)?);
                }
                _ => {
                    let start = self.peek().span;
                    let variant_name = self.ident("a variant name")?;
                    let mut payload = Vec::new();
                    if self.eat(TokenKind::LParen) {
                        while !self.at(TokenKind::RParen) {
                            payload.push(self.parse_type()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RParen, "`)`")?;
                    }
                    let discriminant = if self.eat(TokenKind::Eq) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    variants.push(VariantDecl {
                        id: self.new_id(),
                        name: variant_name,
                        payload,
                        discriminant,
                        span: self.finish(start),
                    });
                    if !self.eat(TokenKind::Comma) && !self.at(TokenKind::RBrace) {
                        if !matches!(self.peek_kind(), TokenKind::Function | TokenKind::Comptime) {
                            self.error_expected("`,` or `}`");
                            return Err(Abort);
                        }
                    }
                }
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(EnumDecl {
            name,
            generics,
            repr,
            variants,
            methods,
        })
    }

    fn parse_trait(&mut self) -> PResult<TraitDecl> {
        self.expect(TokenKind::Trait, "`trait`")?;
        let name = self.ident("a trait name")?;
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut methods = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                self.error_expected("`}`");
                return Err(Abort);
            }
            methods.push(self.parse_function(false, false)?);
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(TraitDecl { name, methods })
    }

    fn parse_impl(&mut self) -> PResult<ImplDecl> {
        self.expect(TokenKind::Impl, "`impl`")?;
        let generics = self.parse_generic_params()?;
        let first = self.parse_type()?;
        let (trait_ref, target) = if self.eat(TokenKind::For) {
            let TypeExprKind::Path(path) = first.kind else {
                self.error(first.span, "expected a trait name before `for`", "E0100");
                return Err(Abort);
            };
            (Some(path), self.parse_type()?)
        } else {
            (None, first)
        };
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut methods = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Comptime) && self.nth_kind(1) == TokenKind::Function {
                self.bump();
                methods.push(self.parse_function(true, false)?);
            } else if self.at(TokenKind::Function) {
                methods.push(self.parse_function(false, false)?);
            } else {
                self.error_expected("a method");
                return Err(Abort);
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(ImplDecl {
            generics,
            trait_ref,
            target,
            methods,
        })
    }

    fn parse_const(&mut self) -> PResult<ConstDecl> {
        self.expect(TokenKind::Const, "`const`")?;
        let name = self.ident("a constant name")?;
        self.expect(TokenKind::Colon, "`:`")?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Eq, "`=`")?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(ConstDecl { name, ty, value })
    }

    fn parse_static(&mut self) -> PResult<StaticDecl> {
        self.expect(TokenKind::Static, "`static`")?;
        let mutable = self.eat(TokenKind::Mut);
        let name = self.ident("a static name")?;
        self.expect(TokenKind::Colon, "`:`")?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Eq, "`=`")?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(StaticDecl {
            name,
            mutable,
            ty,
            value,
        })
    }

    /// `assert(cond, "message")` after the `comptime` keyword.
    fn parse_assert(&mut self) -> PResult<AssertDecl> {
        self.expect(TokenKind::Assert, "`assert`")?;
        self.expect(TokenKind::LParen, "`(`")?;
        let condition = self.parse_expr()?;
        let message = if self.eat(TokenKind::Comma) && !self.at(TokenKind::RParen) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(AssertDecl { condition, message })
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    fn parse_type(&mut self) -> PResult<TypeExpr> {
        self.enter()?;
        let result = self.parse_type_inner();
        self.leave();
        result
    }

    fn parse_type_inner(&mut self) -> PResult<TypeExpr> {
        let start = self.peek().span;
        let kind = match self.peek_kind() {
            TokenKind::LBracket => {
                self.bump();
                let element = self.parse_type()?;
                if self.eat(TokenKind::Semi) {
                    let len = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    TypeExprKind::Array(Box::new(element), Box::new(len))
                } else {
                    self.expect(TokenKind::RBracket, "`]` or `;`")?;
                    TypeExprKind::Vector(Box::new(element))
                }
            }
            TokenKind::LParen => {
                self.bump();
                let mut items = Vec::new();
                let mut trailing_comma = false;
                while !self.at(TokenKind::RParen) {
                    items.push(self.parse_type()?);
                    trailing_comma = self.eat(TokenKind::Comma);
                    if !trailing_comma {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "`)`")?;
                if items.len() == 1 && !trailing_comma {
                    let mut inner = items.remove(0);
                    inner.span = self.finish(start);
                    return self.parse_type_suffix(inner, start);
                }
                TypeExprKind::Tuple(items)
            }
            TokenKind::Amp => {
                self.bump();
                let mutable = self.eat(TokenKind::Mut);
                let inner = self.parse_type()?;
                TypeExprKind::Ref {
                    mutable,
                    inner: Box::new(inner),
                }
            }
            TokenKind::Raw => {
                self.bump();
                TypeExprKind::Raw(Box::new(self.parse_type()?))
            }
            TokenKind::Function => {
                self.bump();
                self.expect(TokenKind::LParen, "`(`")?;
                let mut params = Vec::new();
                while !self.at(TokenKind::RParen) {
                    params.push(self.parse_type()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "`)`")?;
                let ret = if self.eat(TokenKind::Arrow) {
                    self.parse_type()?
                } else {
                    TypeExpr {
                        id: self.new_id(),
                        kind: TypeExprKind::Tuple(Vec::new()),
                        span: self.prev_span(),
                    }
                };
                TypeExprKind::Function {
                    params,
                    ret: Box::new(ret),
                }
            }
            TokenKind::Ident => TypeExprKind::Path(self.parse_path_type()?),
            _ => {
                self.error_expected("a type");
                return Err(Abort);
            }
        };
        let ty = TypeExpr {
            id: self.new_id(),
            kind,
            span: self.finish(start),
        };
        self.parse_type_suffix(ty, start)
    }

    fn parse_type_suffix(&mut self, mut ty: TypeExpr, start: Span) -> PResult<TypeExpr> {
        while self.eat(TokenKind::Question) {
            ty = TypeExpr {
                id: self.new_id(),
                kind: TypeExprKind::Optional(Box::new(ty)),
                span: self.finish(start),
            };
        }
        Ok(ty)
    }

    fn parse_path_type(&mut self) -> PResult<PathType> {
        let start = self.peek().span;
        let mut segments = vec![self.ident("a type name")?];
        while self.at(TokenKind::ColonColon) && self.nth_kind(1) == TokenKind::Ident {
            self.bump();
            segments.push(self.ident("a type name")?);
        }
        // type position: `<` always opens an argument list
        let args = if self.at(TokenKind::Lt) {
            self.parse_generic_args()?
        } else {
            Vec::new()
        };
        Ok(PathType {
            segments,
            args,
            span: self.finish(start),
        })
    }

    /// `<A, B, 4>` with the cursor on `<`.
    fn parse_generic_args(&mut self) -> PResult<Vec<TypeExpr>> {
        self.expect(TokenKind::Lt, "`<`")?;
        let mut args = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::Gt | TokenKind::Shr | TokenKind::GtEq | TokenKind::ShrEq) {
            if matches!(self.peek_kind(), TokenKind::IntLiteral | TokenKind::LBrace) {
                let start = self.peek().span;
                let value = if self.eat(TokenKind::LBrace) {
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::RBrace, "`}`")?;
                    value
                } else {
                    self.parse_primary()?
                };
                args.push(TypeExpr {
                    id: self.new_id(),
                    kind: TypeExprKind::Const(Box::new(value)),
                    span: self.finish(start),
                });
            } else {
                args.push(self.parse_type()?);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_closing_angle()?;
        Ok(args)
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Block> {
        self.enter()?;
        let result = self.parse_block_inner();
        self.leave();
        result
    }

    fn parse_block_inner(&mut self) -> PResult<Block> {
        let start = self.peek().span;
        self.expect(TokenKind::LBrace, "`{`")?;
        let id = self.new_id();
        let mut stmts = Vec::new();
        let mut tail = None;
        loop {
            match self.peek_kind() {
                TokenKind::RBrace => break,
                TokenKind::Eof => {
                    self.error_expected("`}`");
                    return Err(Abort);
                }
                TokenKind::Semi => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            if let Some(previous) = tail.take() {
                // a tail is only a tail when the block ends right after it
                stmts.push(expr_stmt(self.new_id(), previous, false));
            }
            match self.parse_stmt(TokenKind::RBrace) {
                Ok(StmtOrTail::Stmt(stmt)) => stmts.push(stmt),
                Ok(StmtOrTail::Tail(expr)) => tail = Some(expr),
                Err(Abort) => self.synchronize_stmt(),
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(Block {
            id,
            stmts,
            tail: tail.map(Box::new),
            span: self.finish(start),
        })
    }

    fn parse_stmt(&mut self, closer: TokenKind) -> PResult<StmtOrTail> {
        let start = self.peek().span;
        let kind = match self.peek_kind() {
            TokenKind::Let => {
                self.bump();
                let mutable = self.eat(TokenKind::Mut);
                let name = self.ident("a binding name")?;
                let ty = if self.eat(TokenKind::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                self.expect(TokenKind::Eq, "`=`")?;
                let init = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;`")?;
                StmtKind::Let {
                    name,
                    mutable,
                    ty,
                    init,
                }
            }
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Loop => {
                self.bump();
                StmtKind::Loop {
                    body: self.parse_block()?,
                }
            }
            TokenKind::For => {
                self.bump();
                let binding = self.ident("a loop variable")?;
                self.expect(TokenKind::In, "`in`")?;
                let iterable = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::For {
                    binding,
                    iterable,
                    body,
                }
            }
            TokenKind::Defer => {
                self.bump();
                let inner = match self.parse_stmt(closer)? {
                    StmtOrTail::Stmt(stmt) => stmt,
                    StmtOrTail::Tail(expr) => expr_stmt(self.new_id(), expr, false),
                };
                StmtKind::Defer(Box::new(inner))
            }
            TokenKind::Comptime if self.nth_kind(1) == TokenKind::If => {
                self.bump();
                self.parse_comptime_if()?
            }
            TokenKind::Comptime if self.nth_kind(1) == TokenKind::Assert => {
                self.bump();
                let decl = self.parse_assert()?;
                self.expect(TokenKind::Semi, "`;`")?;
                StmtKind::Assert(decl)
            }
            kind if is_item_start(kind) => {
                let span = self.peek().span;
                self.error(span, "declarations are only allowed at the top level", "E0104");
                return Err(Abort);
            }
            kind => {
                let block_like = matches!(
                    kind,
                    TokenKind::If | TokenKind::Match | TokenKind::LBrace | TokenKind::Unsafe
                );
                let expr = if block_like {
                    self.parse_primary()?
                } else {
                    self.parse_expr()?
                };
                if self.eat(TokenKind::Semi) {
                    StmtKind::Expr { expr, semi: true }
                } else if self.at(closer) {
                    return Ok(StmtOrTail::Tail(expr));
                } else if block_like {
                    StmtKind::Expr { expr, semi: false }
                } else {
                    self.error_expected("`;`");
                    return Err(Abort);
                }
            }
        };
        Ok(StmtOrTail::Stmt(Stmt {
            id: self.new_id(),
            kind,
            span: self.finish(start),
        }))
    }

    /// After `comptime`; the cursor is on `if`.
    fn parse_comptime_if(&mut self) -> PResult<StmtKind> {
        self.expect(TokenKind::If, "`if`")?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_branch = if self.eat(TokenKind::Else) {
            let start = self.peek().span;
            let kind = if self.at(TokenKind::If) {
                self.parse_comptime_if()?
            } else {
                let block = self.parse_block()?;
                let span = block.span;
                StmtKind::Expr {
                    expr: Expr {
                        id: self.new_id(),
                        kind: ExprKind::Block(block),
                        span,
                    },
                    semi: false,
                }
            };
            Some(Box::new(Stmt {
                id: self.new_id(),
                kind,
                span: self.finish(start),
            }))
        } else {
            None
        };
        Ok(StmtKind::ComptimeIf {
            cond,
            then_block,
            else_branch,
        })
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_expr_bp_inner(min_bp);
        self.leave();
        result
    }

    fn parse_expr_bp_inner(&mut self, min_bp: u8) -> PResult<Expr> {
        let start = self.peek().span;
        let mut lhs = self.parse_prefix()?;
        // level of the non-associative operator that produced `lhs`
        let mut chained: Option<u8> = None;
        loop {
            let kind = self.peek_kind();
            if kind == TokenKind::As {
                if CAST_BP < min_bp {
                    break;
                }
                self.bump();
                let ty = self.parse_type()?;
                lhs = Expr {
                    id: self.new_id(),
                    kind: ExprKind::Cast {
                        expr: Box::new(lhs),
                        ty,
                    },
                    span: self.finish(start),
                };
                chained = None;
                continue;
            }
            let Some((infix, level, assoc)) = infix_info(kind) else {
                break;
            };
            let left_bp = level * 10;
            if left_bp < min_bp {
                break;
            }
            let op_span = self.peek().span;
            if assoc == Assoc::None && chained == Some(level) {
                let what = if level == 2 { "range" } else { "comparison" };
                self.error(
                    op_span,
                    format!("{what} operators cannot be chained; use parentheses"),
                    "E0103",
                );
                return Err(Abort);
            }
            self.bump();
            let right_bp = match assoc {
                Assoc::Left | Assoc::None => left_bp + 1,
                Assoc::Right => left_bp,
            };
            let rhs = self.parse_expr_bp(right_bp)?;
            let kind = match infix {
                Infix::Binary(op) => ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Infix::Assign(op) => ExprKind::Assign {
                    op,
                    target: Box::new(lhs),
                    value: Box::new(rhs),
                },
                Infix::Range { inclusive } => ExprKind::Range {
                    start: Box::new(lhs),
                    end: Box::new(rhs),
                    inclusive,
                },
            };
            lhs = Expr {
                id: self.new_id(),
                kind,
                span: self.finish(start),
            };
            chained = (assoc == Assoc::None).then_some(level);
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::Star => UnaryOp::Deref,
            TokenKind::Amp if self.nth_kind(1) == TokenKind::Mut => UnaryOp::RefMut,
            TokenKind::Amp => UnaryOp::Ref,
            _ => return self.parse_postfix(),
        };
        self.bump();
        if op == UnaryOp::RefMut {
            self.bump();
        }
        let operand = self.parse_expr_bp(PREFIX_BP)?;
        Ok(Expr {
            id: self.new_id(),
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span: self.finish(start),
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        let mut expr = self.parse_primary()?;
        loop {
            let kind = match self.peek_kind() {
                TokenKind::LParen => ExprKind::Call {
                    callee: Box::new(expr),
                    args: self.parse_args()?,
                },
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    }
                }
                TokenKind::Bang => {
                    self.bump();
                    ExprKind::Unwrap(Box::new(expr))
                }
                TokenKind::Dot => {
                    self.bump();
                    match self.peek_kind() {
                        TokenKind::Ident => {
                            let name = self.ident("a field or method name")?;
                            let generic_args =
                                if self.at(TokenKind::ColonColon) && self.nth_kind(1) == TokenKind::Lt {
                                    self.bump();
                                    self.parse_generic_args()?
                                } else {
                                    Vec::new()
                                };
                            if self.at(TokenKind::LParen) {
                                ExprKind::MethodCall {
                                    receiver: Box::new(expr),
                                    method: name,
                                    generic_args,
                                    args: self.parse_args()?,
                                }
                            } else if !generic_args.is_empty() {
                                self.error_expected("`(` after generic arguments");
                                return Err(Abort);
                            } else {
                                ExprKind::Field {
                                    base: Box::new(expr),
                                    name,
                                }
                            }
                        }
                        TokenKind::IntLiteral => {
                            let token = self.bump();
                            let index = match token.value {
                                Some(LiteralValue::Int { value, suffix: None }) if value <= u32::MAX as u64 => {
                                    value as u32
                                }
                                _ => {
                                    self.error(token.span, "invalid tuple index", "E0100");
                                    return Err(Abort);
                                }
                            };
                            ExprKind::TupleIndex {
                                base: Box::new(expr),
                                index,
                                index_span: token.span,
                            }
                        }
                        _ => {
                            self.error_expected("a field name, method name or tuple index");
                            return Err(Abort);
                        }
                    }
                }
                _ => break,
            };
            expr = Expr {
                id: self.new_id(),
                kind,
                span: self.finish(start),
            };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Arg>> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            let label = if self.at(TokenKind::Ident) && self.nth_kind(1) == TokenKind::Colon {
                let label = self.ident("a label")?;
                self.bump();
                Some(label)
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(Arg { label, value });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)` or `,`")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        let kind = match self.peek_kind() {
            TokenKind::IntLiteral | TokenKind::FloatLiteral | TokenKind::StringLiteral | TokenKind::CharLiteral => {
                let token = self.bump();
                let literal = match token.value {
                    Some(LiteralValue::Int { value, suffix }) => Literal::Int { value, suffix },
                    Some(LiteralValue::Float { value, suffix }) => Literal::Float { value, suffix },
                    Some(LiteralValue::Str(value)) => Literal::Str(value),
                    Some(LiteralValue::Char(value)) => Literal::Char(value),
                    None => return Err(Abort),
                };
                ExprKind::Literal(literal)
            }
            TokenKind::True | TokenKind::False => {
                let value = self.bump().kind == TokenKind::True;
                ExprKind::Literal(Literal::Bool(value))
            }
            TokenKind::None => {
                self.bump();
                ExprKind::None
            }
            TokenKind::Some => {
                self.bump();
                self.expect(TokenKind::LParen, "`(`")?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                ExprKind::Some(Box::new(inner))
            }
            TokenKind::This => {
                self.bump();
                ExprKind::This
            }
            TokenKind::Ident => ExprKind::Path(self.parse_path_expr()?),
            TokenKind::LParen => {
                self.bump();
                if self.eat(TokenKind::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.parse_expr()?;
                    if self.eat(TokenKind::Comma) {
                        let mut items = vec![first];
                        while !self.at(TokenKind::RParen) {
                            items.push(self.parse_expr()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RParen, "`)`")?;
                        ExprKind::Tuple(items)
                    } else {
                        self.expect(TokenKind::RParen, "`)`")?;
                        ExprKind::Paren(Box::new(first))
                    }
                }
            }
            TokenKind::LBracket => {
                self.bump();
                if self.eat(TokenKind::RBracket) {
                    ExprKind::Vector(Vec::new())
                } else {
                    let first = self.parse_expr()?;
                    if self.eat(TokenKind::Semi) {
                        let count = self.parse_expr()?;
                        self.expect(TokenKind::RBracket, "`]`")?;
                        ExprKind::Fill {
                            value: Box::new(first),
                            count: Box::new(count),
                        }
                    } else {
                        let mut items = vec![first];
                        while self.eat(TokenKind::Comma) {
                            if self.at(TokenKind::RBracket) {
                                break;
                            }
                            items.push(self.parse_expr()?);
                        }
                        self.expect(TokenKind::RBracket, "`]` or `,`")?;
                        ExprKind::Vector(items)
                    }
                }
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::Match => self.parse_match()?,
            TokenKind::LBrace => ExprKind::Block(self.parse_block()?),
            TokenKind::Unsafe => {
                self.bump();
                ExprKind::Unsafe(self.parse_block()?)
            }
            TokenKind::Return => {
                self.bump();
                let ends = matches!(
                    self.peek_kind(),
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Comma | TokenKind::RParen | TokenKind::Eof
                );
                let value = if ends { None } else { Some(Box::new(self.parse_expr()?)) };
                ExprKind::Return(value)
            }
            TokenKind::Break => {
                self.bump();
                ExprKind::Break
            }
            TokenKind::Continue => {
                self.bump();
                ExprKind::Continue
            }
            _ => {
                self.error_expected("an expression");
                return Err(Abort);
            }
        };
        Ok(Expr {
            id: self.new_id(),
            kind,
            span: self.finish(start),
        })
    }

    fn parse_path_expr(&mut self) -> PResult<PathExpr> {
        let start = self.peek().span;
        let mut segments = vec![PathSegment {
            ident: self.ident("an identifier")?,
            generic_args: Vec::new(),
        }];
        while self.at(TokenKind::ColonColon) {
            match self.nth_kind(1) {
                // turbofish
                TokenKind::Lt => {
                    self.bump();
                    let args = self.parse_generic_args()?;
                    if let Some(last) = segments.last_mut() {
                        last.generic_args = args;
                    }
                }
                TokenKind::Ident => {
                    self.bump();
                    segments.push(PathSegment {
                        ident: self.ident("an identifier")?,
                        generic_args: Vec::new(),
                    });
                }
                _ => {
                    self.bump();
                    self.error_expected("an identifier or `<` after `::`");
                    return Err(Abort);
                }
            }
        }
        Ok(PathExpr {
            segments,
            span: self.finish(start),
        })
    }

    fn parse_if(&mut self) -> PResult<ExprKind> {
        self.expect(TokenKind::If, "`if`")?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_branch = if self.eat(TokenKind::Else) {
            let start = self.peek().span;
            let kind = if self.at(TokenKind::If) {
                self.parse_if()?
            } else {
                ExprKind::Block(self.parse_block()?)
            };
            Some(Box::new(Expr {
                id: self.new_id(),
                kind,
                span: self.finish(start),
            }))
        } else {
            None
        };
        Ok(ExprKind::If {
            cond: Box::new(cond),
            then_block,
            else_branch,
        })
    }

    fn parse_match(&mut self) -> PResult<ExprKind> {
        self.expect(TokenKind::Match, "`match`")?;
        let scrutinee = self.parse_expr()?;
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut arms = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                self.error_expected("`}`");
                return Err(Abort);
            }
            match self.parse_arm() {
                Ok(arm) => arms.push(arm),
                Err(Abort) => self.synchronize_arm(),
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(ExprKind::Match {
            scrutinee: Box::new(scrutinee),
            arms,
        })
    }

    fn parse_arm(&mut self) -> PResult<MatchArm> {
        let start = self.peek().span;
        let mut patterns = vec![self.parse_pattern()?];
        while self.eat(TokenKind::Pipe) {
            patterns.push(self.parse_pattern()?);
        }
        self.expect(TokenKind::FatArrow, "`=>`")?;
        let body = self.parse_expr()?;
        if !self.eat(TokenKind::Comma) && !self.at(TokenKind::RBrace) && !body.kind.is_block_like() {
            self.error_expected("`,` or `}`");
            return Err(Abort);
        }
        Ok(MatchArm {
            id: self.new_id(),
            patterns,
            body,
            span: self.finish(start),
        })
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        self.enter()?;
        let result = self.parse_pattern_inner();
        self.leave();
        result
    }

    fn parse_pattern_inner(&mut self) -> PResult<Pattern> {
        let start = self.peek().span;
        let kind = match self.peek_kind() {
            TokenKind::Else => {
                self.bump();
                PatternKind::Wildcard
            }
            TokenKind::Minus
                if matches!(self.nth_kind(1), TokenKind::IntLiteral | TokenKind::FloatLiteral) =>
            {
                self.bump();
                let literal = self.literal_token()?;
                PatternKind::Literal {
                    literal,
                    negative: true,
                }
            }
            TokenKind::IntLiteral | TokenKind::FloatLiteral | TokenKind::StringLiteral | TokenKind::CharLiteral => {
                PatternKind::Literal {
                    literal: self.literal_token()?,
                    negative: false,
                }
            }
            TokenKind::True | TokenKind::False => {
                let value = self.bump().kind == TokenKind::True;
                PatternKind::Literal {
                    literal: Literal::Bool(value),
                    negative: false,
                }
            }
            TokenKind::None => {
                self.bump();
                PatternKind::None
            }
            TokenKind::Some => {
                self.bump();
                self.expect(TokenKind::LParen, "`(`")?;
                let inner = self.parse_pattern()?;
                self.expect(TokenKind::RParen, "`)`")?;
                PatternKind::Some(Box::new(inner))
            }
            TokenKind::Ident => {
                let mut path = vec![self.ident("a pattern")?];
                while self.eat(TokenKind::ColonColon) {
                    path.push(self.ident("a variant name")?);
                }
                if path.len() == 1 && !self.at(TokenKind::LParen) {
                    let ident = path.remove(0);
                    if ident.name == "_" {
                        PatternKind::Wildcard
                    } else {
                        PatternKind::Binding(ident)
                    }
                } else {
                    let fields = if self.eat(TokenKind::LParen) {
                        let mut fields = Vec::new();
                        while !self.at(TokenKind::RParen) {
                            fields.push(self.parse_pattern()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RParen, "`)`")?;
                        Some(fields)
                    } else {
                        None
                    };
                    PatternKind::Variant { path, fields }
                }
            }
            _ => {
                self.error_expected("a pattern");
                return Err(Abort);
            }
        };
        Ok(Pattern {
            id: self.new_id(),
            kind,
            span: self.finish(start),
        })
    }

    fn literal_token(&mut self) -> PResult<Literal> {
        let token = self.bump();
        match token.value {
            Some(LiteralValue::Int { value, suffix }) => Ok(Literal::Int { value, suffix }),
            Some(LiteralValue::Float { value, suffix }) => Ok(Literal::Float { value, suffix }),
            Some(LiteralValue::Str(value)) => Ok(Literal::Str(value)),
            Some(LiteralValue::Char(value)) => Ok(Literal::Char(value)),
            None => {
                self.error(token.span, "expected a literal", "E0100");
                Err(Abort)
            }
        }
    }
}

enum StmtOrTail {
    Stmt(Stmt),
    Tail(Expr),
}

fn expr_stmt(id: NodeId, expr: Expr, semi: bool) -> Stmt {
    let span = expr.span;
    Stmt {
        id,
        kind: StmtKind::Expr { expr, semi },
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let unit = parse_unit(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(unit.diagnostics.is_empty(), "unexpected diagnostics: {:?}", unit.diagnostics);
        unit.module
    }

    /// Fully parenthesised rendering of an expression tree.
    fn shape(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Literal(Literal::Int { value, .. }) => value.to_string(),
            ExprKind::Literal(Literal::Bool(value)) => value.to_string(),
            ExprKind::Path(path) => path
                .segments
                .iter()
                .map(|s| s.ident.name.clone())
                .collect::<Vec<_>>()
                .join("::"),
            ExprKind::Binary { op, lhs, rhs } => format!("({} {} {})", shape(lhs), op.symbol(), shape(rhs)),
            ExprKind::Assign { op, target, value } => {
                let symbol = op.map(|op| format!("{}=", op.symbol())).unwrap_or_else(|| "=".into());
                format!("({} {} {})", shape(target), symbol, shape(value))
            }
            ExprKind::Unary { op, operand } => format!("({}{})", op.symbol(), shape(operand)),
            ExprKind::Cast { expr, .. } => format!("({} as _)", shape(expr)),
            ExprKind::Range { start, end, inclusive } => {
                format!("({} {} {})", shape(start), if *inclusive { "..=" } else { ".." }, shape(end))
            }
            ExprKind::Paren(inner) => shape(inner),
            ExprKind::Call { callee, args } => format!(
                "{}({})",
                shape(callee),
                args.iter().map(|a| shape(&a.value)).collect::<Vec<_>>().join(", ")
            ),
            ExprKind::MethodCall { receiver, method, .. } => format!("{}.{}()", shape(receiver), method.name),
            ExprKind::Field { base, name } => format!("{}.{}", shape(base), name.name),
            ExprKind::Unwrap(inner) => format!("{}!", shape(inner)),
            other => format!("{other:?}"),
        }
    }

    fn expr_shape(source: &str) -> String {
        let (expr, diagnostics) = parse_expression(FileId(0), source, DEFAULT_MAX_DEPTH);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        shape(&expr.expect("expression"))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(expr_shape("1 + 2 * 3"), "(1 + (2 * 3))");
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(expr_shape("a - b - c"), "((a - b) - c)");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(expr_shape("a = b += c"), "(a = (b += c))");
    }

    #[test]
    fn full_precedence_ladder() {
        assert_eq!(
            expr_shape("a || b && c == d | e ^ f & g << h + i * j"),
            "(a || (b && (c == (d | (e ^ (f & (g << (h + (i * j)))))))))"
        );
        assert_eq!(expr_shape("x < y == true"), "((x < y) == true)");
        assert_eq!(expr_shape("0..n + 1"), "(0 .. (n + 1))");
    }

    #[test]
    fn prefix_and_cast_ordering() {
        assert_eq!(expr_shape("-x as i64"), "((-x) as _)");
        assert_eq!(expr_shape("a + b as i64"), "(a + (b as _))");
        assert_eq!(expr_shape("-a.b()"), "(-a.b())");
        assert_eq!(expr_shape("*p!"), "(*p!)");
    }

    #[test]
    fn comparison_chaining_is_rejected() {
        let (_, diagnostics) = parse_expression(FileId(0), "a < b < c", DEFAULT_MAX_DEPTH);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Some("E0103"));
    }

    #[test]
    fn less_than_in_expression_is_never_generic() {
        assert_eq!(expr_shape("a < b"), "(a < b)");
        let (expr, diagnostics) = parse_expression(FileId(0), "f::<i32, Box<u8>>(x)", DEFAULT_MAX_DEPTH);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let Some(Expr {
            kind: ExprKind::Call { callee, .. },
            ..
        }) = expr
        else {
            panic!("expected a call");
        };
        let ExprKind::Path(path) = &callee.kind else {
            panic!("expected a path callee");
        };
        assert_eq!(path.segments[0].generic_args.len(), 2);
    }

    #[test]
    fn splits_shift_tokens_closing_nested_generics() {
        let module = parse_ok("function f(b: Box<Box<i32>>) {}\nconst X: [u8; 2] = [1, 2];");
        let ItemKind::Function(function) = &module.items[0].kind else {
            panic!("expected function");
        };
        let TypeExprKind::Path(path) = &function.params[0].ty.kind else {
            panic!("expected path type");
        };
        assert_eq!(path.args.len(), 1);
    }

    #[test]
    fn parses_declarations() {
        let module = parse_ok(
            r#"
            import math as m;
            struct Box<T> { value: T, function get(this) -> T => this.value; }
            class Counter { count: i64 }
            enum Shape { Circle(f64), Rect(f64, f64), Empty }
            enum Color: u8 { Red = 1, Green, Blue = 1 << 4 }
            trait Area { function area(this) -> f64; }
            impl Area for Shape { function area(this) -> f64 { 0.0 } }
            const SIZE: usize = 4;
            static mut HITS: i64 = 0;
            comptime assert(SIZE > 0, "size");
            extern function puts(s: String) -> i32;
            comptime function square<const N: usize>(x: i64) => x * x;
            "#,
        );
        assert_eq!(module.items.len(), 12);
        assert_eq!(module.imports().count(), 1);
    }

    #[test]
    fn block_tail_and_statements() {
        let module = parse_ok("function f(x: i64) -> i64 { let y = x; if y > 0 { y } else { 0 } }");
        let ItemKind::Function(function) = &module.items[0].kind else {
            panic!("expected function");
        };
        let FunctionBody::Block(block) = &function.body else {
            panic!("expected block body");
        };
        assert_eq!(block.stmts.len(), 1);
        assert!(matches!(block.tail.as_deref().map(|e| &e.kind), Some(ExprKind::If { .. })));
    }

    #[test]
    fn parses_match_arms() {
        let module = parse_ok(
            "function f(s: Shape) -> i64 { match s { Shape::Circle(r) => 1, Shape::Rect(_, _) | Shape::Empty => 2, else => 3 } }",
        );
        let ItemKind::Function(function) = &module.items[0].kind else {
            panic!("expected function");
        };
        let FunctionBody::Block(block) = &function.body else {
            panic!("expected block");
        };
        let Some(ExprKind::Match { arms, .. }) = block.tail.as_deref().map(|e| &e.kind) else {
            panic!("expected match");
        };
        assert_eq!(arms.len(), 3);
        assert_eq!(arms[1].patterns.len(), 2);
    }

    #[test]
    fn recovers_after_a_broken_statement() {
        let unit = parse_unit(
            FileId(0),
            "function a() { let x = ; let y = 2; }\nfunction b() { ) }\nfunction c() {}",
            DEFAULT_MAX_DEPTH,
        );
        assert_eq!(unit.diagnostics.len(), 2, "{:?}", unit.diagnostics);
        assert!(unit.diagnostics.iter().all(|d| d.category == Category::Syntax));
        let names: Vec<_> = unit
            .module
            .items
            .iter()
            .filter_map(|item| item.kind.declared_name().map(|n| n.name.clone()))
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn recovers_at_the_next_declaration() {
        let unit = parse_unit(FileId(0), "struct { x: i32 }\nfunction ok() {}", DEFAULT_MAX_DEPTH);
        assert_eq!(unit.diagnostics.len(), 1);
        assert!(unit.diagnostics[0].message.starts_with("expected a type name"));
        assert_eq!(unit.module.items.len(), 1);
    }

    #[test]
    fn deep_nesting_is_diagnosed() {
        let source = format!("function f() {{ let x = {}1{}; }}\nfunction g() {{}}", "(".repeat(500), ")".repeat(500));
        let unit = parse_unit(FileId(0), &source, 64);
        assert_eq!(unit.diagnostics.len(), 1);
        assert_eq!(unit.diagnostics[0].code, Some("E0110"));
        assert_eq!(unit.module.items.len(), 2);
    }

    #[test]
    fn default_depth_limit_is_diagnosed_on_a_stage_thread() {
        let source = format!("function f() {{ let x = {}1{}; }}", "(".repeat(400), ")".repeat(400));
        let unit = crate::compiler::on_stage_stack(|| parse_unit(FileId(0), &source, DEFAULT_MAX_DEPTH))
            .expect("thread starts");
        assert_eq!(unit.diagnostics.len(), 1);
        assert_eq!(unit.diagnostics[0].code, Some("E0110"));
        assert!(unit.diagnostics[0].message.contains("limit is 256"));
    }

    #[test]
    fn missing_closing_brace_is_reported() {
        let unit = parse_unit(FileId(0), "function f() { let x = 1;", DEFAULT_MAX_DEPTH);
        assert_eq!(unit.diagnostics.len(), 1);
        assert!(unit.diagnostics[0].message.contains("expected `}`"));
    }

    #[test]
    fn node_ids_are_unique() {
        let module = parse_ok("function f(a: i64) -> i64 { let b = a * 2; b + 1 }");
        let parents = ParentMap::build(&module);
        assert!(parents.len() > 8);
        let ItemKind::Function(function) = &module.items[0].kind else {
            panic!("expected function");
        };
        assert_eq!(parents.parent(function.id), Some(module.items[0].id));
    }

    #[test]
    fn fragments_separate_items_from_statements() {
        let (fragment, diagnostics) =
            parse_fragment(FileId(0), "function sq(x: i64) => x * x; let y = 2; sq(y)", DEFAULT_MAX_DEPTH);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(fragment.items.len(), 1);
        assert_eq!(fragment.stmts.len(), 1);
        assert!(fragment.tail.is_some());
    }
}
