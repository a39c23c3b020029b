//! A minimal parser over the tested subset of the surface language.
//!
//! `DummyParser` exists so the pipeline can be driven end-to-end without
//! the production front end, and so template expansion and `@emit` output
//! have something to re-parse in tests. It is a plain recursive-descent
//! parser with single-token lookahead; raw blocks (`asm`, `@minz`,
//! `@define` bodies) are captured textually with brace tracking.

use crate::environ::{ParseError, Parser};
use minz_ast::{
    Attribute, BinOp, BitFieldDecl, Decl, DeclKind, EnumVariant, Expr, ExprKind, FieldDecl,
    FunctionDecl, IterMethod, IterOp, LambdaParam, LoopMode, MinzBody, NodeIds, ParamDecl, Pos,
    Stmt, StmtKind, TypeExpr, UnOp,
};

/// The built-in test parser.
#[derive(Default)]
pub struct DummyParser;

impl DummyParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }
}

impl Parser for DummyParser {
    fn parse(
        &mut self,
        source: &str,
        file: &str,
        ids: &mut NodeIds,
    ) -> Result<Vec<Decl>, ParseError> {
        let mut p = P::new(source, ids);
        let _ = file;
        p.parse_program()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64, Option<String>),
    Str(String),
    At(String),
    Punct(&'static str),
    Eof,
}

struct Lexer<'s> {
    src: &'s str,
    at: usize,
    line: u32,
    col: u32,
}

impl<'s> Lexer<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            at: 0,
            line: 1,
            col: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col, self.at as u32)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.src[self.at..].chars().next()?;
        self.at += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.at..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut it = self.src[self.at..].chars();
        it.next();
        it.next()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<(Tok, Pos), ParseError> {
        self.skip_trivia();
        let pos = self.pos();
        let Some(c) = self.peek_char() else {
            return Ok((Tok::Eof, pos));
        };
        match c {
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = self.at;
                while matches!(self.peek_char(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
                {
                    self.bump();
                }
                Ok((Tok::Ident(self.src[start..self.at].to_string()), pos))
            }
            '0'..='9' => {
                let start = self.at;
                let value = if c == '0' && self.peek2() == Some('x') {
                    self.bump();
                    self.bump();
                    let digits = self.at;
                    while matches!(self.peek_char(), Some(c) if c.is_ascii_hexdigit()) {
                        self.bump();
                    }
                    i64::from_str_radix(&self.src[digits..self.at], 16).map_err(|_| ParseError {
                        message: "invalid hex literal".to_string(),
                        pos,
                    })?
                } else {
                    while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                        self.bump();
                    }
                    self.src[start..self.at].parse().map_err(|_| ParseError {
                        message: "integer literal out of range".to_string(),
                        pos,
                    })?
                };
                // Width suffix: 255u8, 1000u16, ...
                let suffix_start = self.at;
                while matches!(self.peek_char(), Some(c) if c.is_ascii_alphanumeric()) {
                    self.bump();
                }
                let suffix = if suffix_start == self.at {
                    None
                } else {
                    Some(self.src[suffix_start..self.at].to_string())
                };
                Ok((Tok::Int(value, suffix), pos))
            }
            '"' => {
                self.bump();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some('\\') => match self.bump() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('\\') => text.push('\\'),
                            Some('"') => text.push('"'),
                            Some(c) => text.push(c),
                            None => {
                                return Err(ParseError {
                                    message: "unterminated string literal".to_string(),
                                    pos,
                                })
                            }
                        },
                        Some(c) => text.push(c),
                        None => {
                            return Err(ParseError {
                                message: "unterminated string literal".to_string(),
                                pos,
                            })
                        }
                    }
                }
                Ok((Tok::Str(text), pos))
            }
            '@' => {
                self.bump();
                let start = self.at;
                while matches!(self.peek_char(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '.')
                {
                    self.bump();
                }
                Ok((Tok::At(self.src[start..self.at].to_string()), pos))
            }
            _ => {
                self.bump();
                let two = |l: &mut Self, second: char, long: &'static str, short: &'static str| {
                    if l.peek_char() == Some(second) {
                        l.bump();
                        long
                    } else {
                        short
                    }
                };
                let punct = match c {
                    '(' => "(",
                    ')' => ")",
                    '{' => "{",
                    '}' => "}",
                    '[' => "[",
                    ']' => "]",
                    ',' => ",",
                    ';' => ";",
                    ':' => ":",
                    '?' => "?",
                    '~' => "~",
                    '+' => "+",
                    '%' => "%",
                    '/' => "/",
                    '*' => "*",
                    '^' => "^",
                    '-' => two(self, '>', "->", "-"),
                    '=' => two(self, '=', "==", "="),
                    '!' => two(self, '=', "!=", "!"),
                    '<' => match self.peek_char() {
                        Some('=') => {
                            self.bump();
                            "<="
                        }
                        Some('<') => {
                            self.bump();
                            "<<"
                        }
                        _ => "<",
                    },
                    '>' => match self.peek_char() {
                        Some('=') => {
                            self.bump();
                            ">="
                        }
                        Some('>') => {
                            self.bump();
                            ">>"
                        }
                        _ => ">",
                    },
                    '&' => two(self, '&', "&&", "&"),
                    '|' => two(self, '|', "||", "|"),
                    '.' => two(self, '.', "..", "."),
                    other => {
                        return Err(ParseError {
                            message: format!("unexpected character `{other}`"),
                            pos,
                        })
                    }
                };
                Ok((Tok::Punct(punct), pos))
            }
        }
    }

    /// Capture the raw text of a brace-delimited block, the opening brace
    /// already consumed. Tracks nesting and string literals.
    fn capture_block(&mut self) -> Result<String, ParseError> {
        let start = self.at;
        let pos = self.pos();
        let mut depth = 1usize;
        let mut in_string = false;
        loop {
            let Some(c) = self.bump() else {
                return Err(ParseError {
                    message: "unterminated block".to_string(),
                    pos,
                });
            };
            match c {
                '"' => in_string = !in_string,
                '\\' if in_string => {
                    self.bump();
                }
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let end = self.at - 1;
                        return Ok(self.src[start..end].to_string());
                    }
                }
                _ => {}
            }
        }
    }
}

struct P<'s, 'i> {
    lex: Lexer<'s>,
    ids: &'i mut NodeIds,
    look: Option<(Tok, Pos)>,
}

impl<'s, 'i> P<'s, 'i> {
    fn new(src: &'s str, ids: &'i mut NodeIds) -> Self {
        Self {
            lex: Lexer::new(src),
            ids,
            look: None,
        }
    }

    fn peek(&mut self) -> Result<&(Tok, Pos), ParseError> {
        if self.look.is_none() {
            self.look = Some(self.lex.next_token()?);
        }
        Ok(self.look.as_ref().expect("just filled"))
    }

    fn next(&mut self) -> Result<(Tok, Pos), ParseError> {
        match self.look.take() {
            Some(t) => Ok(t),
            None => self.lex.next_token(),
        }
    }

    fn eat_punct(&mut self, p: &str) -> Result<bool, ParseError> {
        if matches!(self.peek()?, (Tok::Punct(q), _) if *q == p) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<Pos, ParseError> {
        let (tok, pos) = self.next()?;
        match tok {
            Tok::Punct(q) if q == p => Ok(pos),
            other => Err(ParseError {
                message: format!("expected `{p}`, found {other:?}"),
                pos,
            }),
        }
    }

    fn eat_kw(&mut self, kw: &str) -> Result<bool, ParseError> {
        if matches!(self.peek()?, (Tok::Ident(w), _) if w == kw) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_ident(&mut self) -> Result<(String, Pos), ParseError> {
        let (tok, pos) = self.next()?;
        match tok {
            Tok::Ident(name) => Ok((name, pos)),
            other => Err(ParseError {
                message: format!("expected an identifier, found {other:?}"),
                pos,
            }),
        }
    }

    fn expr(&mut self, pos: Pos, kind: ExprKind) -> Expr {
        Expr {
            id: self.ids.next(),
            pos,
            kind,
        }
    }

    // ---- declarations ---------------------------------------------------

    fn parse_program(&mut self) -> Result<Vec<Decl>, ParseError> {
        let mut decls = Vec::new();
        let mut attrs = Vec::new();
        loop {
            match self.peek()?.clone() {
                (Tok::Eof, _) => break,
                (Tok::At(name), pos) => {
                    self.next()?;
                    match name.as_str() {
                        "abi" => {
                            self.expect_punct("(")?;
                            let (tok, vpos) = self.next()?;
                            let Tok::Str(value) = tok else {
                                return Err(ParseError {
                                    message: "@abi needs a string".to_string(),
                                    pos: vpos,
                                });
                            };
                            self.expect_punct(")")?;
                            attrs.push(Attribute {
                                name: "abi".to_string(),
                                value: Some(value),
                                pos,
                            });
                        }
                        "minz" => {
                            self.expect_punct("{")?;
                            debug_assert!(self.look.is_none());
                            let raw = self.lex.capture_block()?;
                            let body = match parse_stmts_text(&raw, self.ids) {
                                Some(stmts) => MinzBody::Stmts(stmts),
                                None => MinzBody::Raw(raw),
                            };
                            decls.push(Decl {
                                pos,
                                kind: DeclKind::MinzBlock(body),
                            });
                        }
                        "define" => {
                            self.expect_punct("(")?;
                            let mut params = Vec::new();
                            if !self.eat_punct(")")? {
                                loop {
                                    params.push(self.expect_ident()?.0);
                                    if !self.eat_punct(",")? {
                                        break;
                                    }
                                }
                                self.expect_punct(")")?;
                            }
                            self.expect_punct("{")?;
                            debug_assert!(self.look.is_none());
                            let body = self.lex.capture_block()?;
                            decls.push(Decl {
                                pos,
                                kind: DeclKind::TemplateDef { params, body },
                            });
                        }
                        "expand" => {
                            self.expect_punct("(")?;
                            let args = self.parse_call_args()?;
                            self.eat_punct(";")?;
                            decls.push(Decl {
                                pos,
                                kind: DeclKind::TemplateUse { args },
                            });
                        }
                        "incbin" => {
                            self.expect_punct("(")?;
                            let (tok, vpos) = self.next()?;
                            let Tok::Str(path) = tok else {
                                return Err(ParseError {
                                    message: "@incbin needs a string path".to_string(),
                                    pos: vpos,
                                });
                            };
                            self.expect_punct(")")?;
                            self.eat_punct(";")?;
                            decls.push(Decl {
                                pos,
                                kind: DeclKind::Incbin(path),
                            });
                        }
                        other => {
                            return Err(ParseError {
                                message: format!("unknown directive @{other} at top level"),
                                pos,
                            })
                        }
                    }
                }
                (_, _) => {
                    let decl = self.parse_decl(std::mem::take(&mut attrs))?;
                    decls.push(decl);
                }
            }
        }
        Ok(decls)
    }

    fn parse_decl(&mut self, attrs: Vec<Attribute>) -> Result<Decl, ParseError> {
        let public = self.eat_kw("pub")?;
        let (tok, pos) = self.peek()?.clone();
        let Tok::Ident(word) = tok else {
            return Err(ParseError {
                message: format!("expected a declaration, found {tok:?}"),
                pos,
            });
        };
        match word.as_str() {
            "fun" => {
                self.next()?;
                self.parse_fun(attrs, public, pos)
            }
            "const" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                let ty = if self.eat_punct(":")? {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                self.expect_punct("=")?;
                let value = self.parse_expr(0)?;
                self.eat_punct(";")?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::Const {
                        name,
                        ty,
                        value,
                        public,
                    },
                })
            }
            "global" | "let" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                let ty = if self.eat_punct(":")? {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let value = if self.eat_punct("=")? {
                    Some(self.parse_expr(0)?)
                } else {
                    None
                };
                self.eat_punct(";")?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::Global {
                        name,
                        ty,
                        value,
                        public,
                    },
                })
            }
            "struct" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                self.expect_punct("{")?;
                let mut fields = Vec::new();
                while !self.eat_punct("}")? {
                    let (fname, _) = self.expect_ident()?;
                    self.expect_punct(":")?;
                    let ty = self.parse_type()?;
                    fields.push(FieldDecl { name: fname, ty });
                    self.eat_punct(",")?;
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::Struct { name, fields },
                })
            }
            "enum" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                self.expect_punct("{")?;
                let mut variants = Vec::new();
                while !self.eat_punct("}")? {
                    let (vname, _) = self.expect_ident()?;
                    let value = if self.eat_punct("=")? {
                        let (tok, vpos) = self.next()?;
                        match tok {
                            Tok::Int(v, _) => Some(v),
                            other => {
                                return Err(ParseError {
                                    message: format!(
                                        "enum value must be an integer, found {other:?}"
                                    ),
                                    pos: vpos,
                                })
                            }
                        }
                    } else {
                        None
                    };
                    variants.push(EnumVariant { name: vname, value });
                    self.eat_punct(",")?;
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::Enum { name, variants },
                })
            }
            "bits" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                self.expect_punct(":")?;
                let underlying = self.parse_type()?;
                self.expect_punct("{")?;
                let mut fields = Vec::new();
                while !self.eat_punct("}")? {
                    let (fname, _) = self.expect_ident()?;
                    self.expect_punct(":")?;
                    let (tok, vpos) = self.next()?;
                    let Tok::Int(width, _) = tok else {
                        return Err(ParseError {
                            message: "bit width must be an integer".to_string(),
                            pos: vpos,
                        });
                    };
                    fields.push(BitFieldDecl {
                        name: fname,
                        width: width as u8,
                    });
                    self.eat_punct(",")?;
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::BitStruct {
                        name,
                        underlying,
                        fields,
                    },
                })
            }
            "type" => {
                self.next()?;
                let (name, _) = self.expect_ident()?;
                self.expect_punct("=")?;
                let ty = self.parse_type()?;
                self.eat_punct(";")?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::TypeAlias { name, ty },
                })
            }
            "import" => {
                self.next()?;
                let mut path = self.expect_ident()?.0;
                while self.eat_punct(".")? {
                    path.push('.');
                    path.push_str(&self.expect_ident()?.0);
                }
                let alias = if self.eat_kw("as")? {
                    Some(self.expect_ident()?.0)
                } else {
                    None
                };
                self.eat_punct(";")?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::Import { path, alias },
                })
            }
            other => Err(ParseError {
                message: format!("expected a declaration, found `{other}`"),
                pos,
            }),
        }
    }

    fn parse_fun(
        &mut self,
        attributes: Vec<Attribute>,
        public: bool,
        pos: Pos,
    ) -> Result<Decl, ParseError> {
        let (name, _) = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")")? {
            loop {
                let (pname, ppos) = self.expect_ident()?;
                self.expect_punct(":")?;
                let ty = self.parse_type()?;
                params.push(ParamDecl {
                    name: pname,
                    ty,
                    pos: ppos,
                });
                if !self.eat_punct(",")? {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        let return_type = if self.eat_punct("->")? {
            Some(self.parse_type()?)
        } else {
            None
        };
        let error_type = if self.eat_punct("?")? {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect_punct("{")?;
        let body = self.parse_block_body()?;
        Ok(Decl {
            pos,
            kind: DeclKind::Function(FunctionDecl {
                name,
                params,
                return_type,
                error_type,
                attributes,
                body,
                public,
            }),
        })
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        if self.eat_punct("*")? {
            return Ok(TypeExpr::Pointer(Box::new(self.parse_type()?)));
        }
        if self.eat_punct("[")? {
            let elem = self.parse_type()?;
            self.expect_punct(";")?;
            let len = self.parse_expr(0)?;
            self.expect_punct("]")?;
            return Ok(TypeExpr::Array {
                elem: Box::new(elem),
                len: Box::new(len),
            });
        }
        let (mut name, _) = self.expect_ident()?;
        while matches!(self.peek()?, (Tok::Punct("."), _)) {
            // Dotted type name: `game.Sprite`.
            self.next()?;
            name.push('.');
            name.push_str(&self.expect_ident()?.0);
        }
        Ok(TypeExpr::Named(name))
    }

    // ---- statements -----------------------------------------------------

    /// Parse statements up to the closing `}` of an already-opened block.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.eat_punct("}")? {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let (tok, pos) = self.peek()?.clone();
        match tok {
            Tok::Ident(word) => match word.as_str() {
                "let" => {
                    self.next()?;
                    // `mut` is accepted noise; bindings in this surface
                    // subset are assignable either way.
                    let _ = self.eat_kw("mut")?;
                    let (name, _) = self.expect_ident()?;
                    let ty = if self.eat_punct(":")? {
                        Some(self.parse_type()?)
                    } else {
                        None
                    };
                    let value = if self.eat_punct("=")? {
                        Some(self.parse_expr(0)?)
                    } else {
                        None
                    };
                    self.eat_punct(";")?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::Let {
                            name,
                            ty,
                            value,
                            mutable: true,
                        },
                    })
                }
                "return" => {
                    self.next()?;
                    let value = if matches!(self.peek()?, (Tok::Punct(";"), _)) {
                        None
                    } else {
                        Some(self.parse_expr(0)?)
                    };
                    self.eat_punct(";")?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::Return(value),
                    })
                }
                "if" => {
                    self.next()?;
                    self.parse_if(pos)
                }
                "while" => {
                    self.next()?;
                    let cond = self.parse_expr(0)?;
                    self.expect_punct("{")?;
                    let body = self.parse_block_body()?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::While { cond, body },
                    })
                }
                "for" => {
                    self.next()?;
                    let (var, _) = self.expect_ident()?;
                    if !self.eat_kw("in")? {
                        return Err(ParseError {
                            message: "expected `in` in for loop".to_string(),
                            pos,
                        });
                    }
                    let lo = self.parse_expr(1)?;
                    self.expect_punct("..")?;
                    let hi = self.parse_expr(1)?;
                    self.expect_punct("{")?;
                    let body = self.parse_block_body()?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::For { var, lo, hi, body },
                    })
                }
                "do" => {
                    self.next()?;
                    let count = self.parse_expr(0)?;
                    if !self.eat_kw("times")? {
                        return Err(ParseError {
                            message: "expected `times` after the loop count".to_string(),
                            pos,
                        });
                    }
                    self.expect_punct("{")?;
                    let body = self.parse_block_body()?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::Times { count, body },
                    })
                }
                "loop" => {
                    self.next()?;
                    if !self.eat_kw("at")? {
                        return Err(ParseError {
                            message: "expected `at` after `loop`".to_string(),
                            pos,
                        });
                    }
                    let array = self.parse_expr(0)?;
                    let mode = if self.eat_punct("->")? {
                        LoopMode::Ref
                    } else if self.eat_kw("into")? {
                        LoopMode::Into
                    } else {
                        return Err(ParseError {
                            message: "expected `->` or `into` in loop header".to_string(),
                            pos,
                        });
                    };
                    let (item, _) = self.expect_ident()?;
                    self.expect_punct("{")?;
                    let body = self.parse_block_body()?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::LoopAt {
                            array,
                            item,
                            mode,
                            body,
                        },
                    })
                }
                "asm" => {
                    self.next()?;
                    self.expect_punct("{")?;
                    debug_assert!(self.look.is_none());
                    let text = self.lex.capture_block()?;
                    Ok(Stmt {
                        pos,
                        kind: StmtKind::Asm(text.trim().to_string()),
                    })
                }
                _ => self.parse_expr_or_assign(pos),
            },
            Tok::Punct("{") => {
                self.next()?;
                let body = self.parse_block_body()?;
                Ok(Stmt {
                    pos,
                    kind: StmtKind::Block(body),
                })
            }
            _ => self.parse_expr_or_assign(pos),
        }
    }

    fn parse_if(&mut self, pos: Pos) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr(0)?;
        self.expect_punct("{")?;
        let then_body = self.parse_block_body()?;
        let else_body = if self.eat_kw("else")? {
            if matches!(self.peek()?, (Tok::Ident(w), _) if w == "if") {
                let (_, elif_pos) = self.next()?;
                Some(vec![self.parse_if(elif_pos)?])
            } else {
                self.expect_punct("{")?;
                Some(self.parse_block_body()?)
            }
        } else {
            None
        };
        Ok(Stmt {
            pos,
            kind: StmtKind::If {
                cond,
                then_body,
                else_body,
            },
        })
    }

    fn parse_expr_or_assign(&mut self, pos: Pos) -> Result<Stmt, ParseError> {
        let expr = self.parse_expr(0)?;
        if self.eat_punct("=")? {
            let value = self.parse_expr(0)?;
            self.eat_punct(";")?;
            return Ok(Stmt {
                pos,
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
            });
        }
        self.eat_punct(";")?;
        Ok(Stmt {
            pos,
            kind: StmtKind::Expr(expr),
        })
    }

    // ---- expressions ----------------------------------------------------

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat_punct(")")? {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            if !self.eat_punct(",")? {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn binop_of(p: &str) -> Option<(BinOp, u8)> {
        Some(match p {
            "||" => (BinOp::Or, 1),
            "&&" => (BinOp::And, 2),
            "==" => (BinOp::Eq, 3),
            "!=" => (BinOp::Ne, 3),
            "<" => (BinOp::Lt, 3),
            "<=" => (BinOp::Le, 3),
            ">" => (BinOp::Gt, 3),
            ">=" => (BinOp::Ge, 3),
            "|" => (BinOp::Or, 4),
            "^" => (BinOp::Xor, 5),
            "&" => (BinOp::And, 6),
            "<<" => (BinOp::Shl, 7),
            ">>" => (BinOp::Shr, 7),
            "+" => (BinOp::Add, 8),
            "-" => (BinOp::Sub, 8),
            "*" => (BinOp::Mul, 9),
            "/" => (BinOp::Div, 9),
            "%" => (BinOp::Mod, 9),
            _ => return None,
        })
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (tok, pos) = self.peek()?.clone();
            // `..` as a general range expression (compile-time loops).
            if matches!(&tok, Tok::Punct("..")) && min_prec == 0 {
                self.next()?;
                let hi = self.parse_expr(1)?;
                lhs = self.expr(
                    pos,
                    ExprKind::Range {
                        lo: Box::new(lhs),
                        hi: Box::new(hi),
                    },
                );
                continue;
            }
            let Tok::Punct(p) = tok else { break };
            let Some((op, prec)) = Self::binop_of(p) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.next()?;
            let rhs = self.parse_expr(prec + 1)?;
            lhs = self.expr(
                pos,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let (tok, pos) = self.peek()?.clone();
        let op = match tok {
            Tok::Punct("-") => Some(UnOp::Neg),
            Tok::Punct("!") => Some(UnOp::Not),
            Tok::Punct("~") => Some(UnOp::BitNot),
            Tok::Punct("&") => Some(UnOp::AddrOf),
            _ => None,
        };
        if let Some(op) = op {
            self.next()?;
            let operand = self.parse_unary()?;
            return Ok(self.expr(
                pos,
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let (tok, pos) = self.peek()?.clone();
            match tok {
                Tok::Punct("(") => {
                    self.next()?;
                    let args = self.parse_call_args()?;
                    expr = self.expr(
                        pos,
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    );
                }
                Tok::Punct("[") => {
                    self.next()?;
                    let index = self.parse_expr(0)?;
                    self.expect_punct("]")?;
                    expr = self.expr(
                        pos,
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                    );
                }
                Tok::Punct(".") => {
                    self.next()?;
                    let (name, npos) = self.expect_ident()?;
                    if name == "iter" && self.eat_punct("(")? {
                        self.expect_punct(")")?;
                        expr = self.parse_iter_chain(expr, npos)?;
                    } else {
                        expr = self.expr(
                            pos,
                            ExprKind::Field {
                                base: Box::new(expr),
                                field: name,
                            },
                        );
                    }
                }
                Tok::Ident(w) if w == "as" => {
                    self.next()?;
                    let ty = self.parse_type()?;
                    expr = self.expr(
                        pos,
                        ExprKind::Cast {
                            value: Box::new(expr),
                            ty,
                        },
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_iter_chain(&mut self, source: Expr, pos: Pos) -> Result<Expr, ParseError> {
        let mut ops = Vec::new();
        while matches!(self.peek()?, (Tok::Punct("."), _)) {
            self.next()?;
            let (name, mpos) = self.expect_ident()?;
            let Some(method) = iter_method(&name) else {
                return Err(ParseError {
                    message: format!("unknown iterator operator `{name}`"),
                    pos: mpos,
                });
            };
            let args = if self.eat_punct("(")? {
                self.parse_call_args()?
            } else {
                Vec::new()
            };
            ops.push(IterOp {
                method,
                args,
                pos: mpos,
            });
        }
        Ok(self.expr(
            pos,
            ExprKind::IterChain {
                source: Box::new(source),
                ops,
            },
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let (tok, pos) = self.next()?;
        match tok {
            Tok::Int(v, suffix) => {
                let lit = self.expr(pos, ExprKind::IntLit(v));
                match suffix {
                    Some(name) => Ok(self.expr(
                        pos,
                        ExprKind::Cast {
                            value: Box::new(lit),
                            ty: TypeExpr::Named(name),
                        },
                    )),
                    None => Ok(lit),
                }
            }
            Tok::Str(s) => Ok(self.expr(pos, ExprKind::StrLit(s))),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(self.expr(pos, ExprKind::BoolLit(true))),
                "false" => Ok(self.expr(pos, ExprKind::BoolLit(false))),
                _ => {
                    // `Name { field: v }` is a struct literal when the name
                    // is capitalized; lowercase identifiers before `{`
                    // belong to statement headers.
                    let capitalized = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
                    if capitalized && matches!(self.peek()?, (Tok::Punct("{"), _)) {
                        self.next()?;
                        let mut fields = Vec::new();
                        while !self.eat_punct("}")? {
                            let (fname, _) = self.expect_ident()?;
                            self.expect_punct(":")?;
                            let value = self.parse_expr(0)?;
                            fields.push((fname, value));
                            self.eat_punct(",")?;
                        }
                        return Ok(self.expr(pos, ExprKind::StructLit { name, fields }));
                    }
                    Ok(self.expr(pos, ExprKind::Ident(name)))
                }
            },
            Tok::At(name) => {
                let args = if self.eat_punct("(")? {
                    self.parse_call_args()?
                } else {
                    Vec::new()
                };
                Ok(self.expr(pos, ExprKind::CompileTime { name, args }))
            }
            Tok::Punct("(") => {
                let inner = self.parse_expr(0)?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => {
                let mut elems = Vec::new();
                while !self.eat_punct("]")? {
                    elems.push(self.parse_expr(0)?);
                    self.eat_punct(",")?;
                }
                Ok(self.expr(pos, ExprKind::ArrayLit(elems)))
            }
            Tok::Punct("|") => {
                // Lambda: `|x| expr` or `|x: u8| expr`.
                let mut params = Vec::new();
                loop {
                    let (name, _) = self.expect_ident()?;
                    let ty = if self.eat_punct(":")? {
                        Some(self.parse_type()?)
                    } else {
                        None
                    };
                    params.push(LambdaParam { name, ty });
                    if !self.eat_punct(",")? {
                        break;
                    }
                }
                self.expect_punct("|")?;
                let body = self.parse_expr(0)?;
                Ok(self.expr(
                    pos,
                    ExprKind::Lambda {
                        params,
                        body: Box::new(body),
                    },
                ))
            }
            other => Err(ParseError {
                message: format!("unexpected token {other:?}"),
                pos,
            }),
        }
    }
}

fn iter_method(name: &str) -> Option<IterMethod> {
    Some(match name {
        "map" => IterMethod::Map,
        "filter" => IterMethod::Filter,
        "forEach" => IterMethod::ForEach,
        "take" => IterMethod::Take,
        "skip" => IterMethod::Skip,
        "takeWhile" => IterMethod::TakeWhile,
        "skipWhile" => IterMethod::SkipWhile,
        "enumerate" => IterMethod::Enumerate,
        "peek" => IterMethod::Peek,
        "inspect" => IterMethod::Inspect,
        "chain" => IterMethod::Chain,
        "flatMap" => IterMethod::FlatMap,
        "collect" => IterMethod::Collect,
        "reduce" => IterMethod::Reduce,
        "zip" => IterMethod::Zip,
        _ => return None,
    })
}

/// Try to parse raw block text as statements; `None` leaves the raw form.
fn parse_stmts_text(text: &str, ids: &mut NodeIds) -> Option<Vec<Stmt>> {
    let mut p = P::new(text, ids);
    let mut stmts = Vec::new();
    loop {
        match p.peek() {
            Ok((Tok::Eof, _)) => break,
            Ok(_) => match p.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(_) => return None,
            },
            Err(_) => return None,
        }
    }
    Some(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Decl> {
        let mut ids = NodeIds::new();
        DummyParser::new()
            .parse(src, "test.minz", &mut ids)
            .expect("test source should parse")
    }

    #[test]
    fn parses_functions_and_positions() {
        let decls = parse("fun twice(x: u8) -> u8 { return x + x; }\nfun main() -> u8 { return twice(21); }");
        assert_eq!(decls.len(), 2);
        let DeclKind::Function(f) = &decls[0].kind else {
            panic!("expected a function");
        };
        assert_eq!(f.name, "twice");
        assert_eq!(f.params.len(), 1);
        assert_eq!(decls[1].pos.line, 2);
    }

    #[test]
    fn parses_suffixed_literals_as_casts() {
        let decls = parse("fun f() -> u16 { return 1000u16; }");
        let DeclKind::Function(f) = &decls[0].kind else {
            panic!()
        };
        let StmtKind::Return(Some(e)) = &f.body[0].kind else {
            panic!()
        };
        assert!(matches!(
            &e.kind,
            ExprKind::Cast {
                ty: TypeExpr::Named(n),
                ..
            } if n == "u16"
        ));
    }

    #[test]
    fn parses_iterator_chains() {
        let decls = parse("fun f() -> void { xs.iter().map(double).filter(gt5).forEach(print_u8); }");
        let DeclKind::Function(f) = &decls[0].kind else {
            panic!()
        };
        let StmtKind::Expr(e) = &f.body[0].kind else {
            panic!()
        };
        let ExprKind::IterChain { ops, .. } = &e.kind else {
            panic!("expected a chain, got {e:?}")
        };
        let methods: Vec<IterMethod> = ops.iter().map(|o| o.method).collect();
        assert_eq!(
            methods,
            vec![IterMethod::Map, IterMethod::Filter, IterMethod::ForEach]
        );
    }

    #[test]
    fn captures_minz_blocks() {
        let decls = parse("@minz { for i in 0..3 { @emit(\"const C{i}: u8 = {i*i};\") } }");
        let DeclKind::MinzBlock(MinzBody::Stmts(stmts)) = &decls[0].kind else {
            panic!("expected structured statements, got {:?}", decls[0].kind)
        };
        assert!(matches!(stmts[0].kind, StmtKind::For { .. }));
    }

    #[test]
    fn captures_templates() {
        let decls = parse("@define(name, size) { global {0}: [u8; {1}]; }\n@expand(buffer, 32);");
        assert!(matches!(&decls[0].kind, DeclKind::TemplateDef { params, .. } if params.len() == 2));
        assert!(matches!(&decls[1].kind, DeclKind::TemplateUse { args } if args.len() == 2));
    }
}
