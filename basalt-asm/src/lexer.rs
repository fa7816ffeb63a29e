//! Assembler for Basalt bytecode
//!
//! Lexer for the assembly syntax. A mnemonic or directive that opens a line
//! (or follows a label definition) is lexed as an instruction, every other
//! word as an identifier.

use basalt_vm::isa::Opcode;

use crate::error::{LexError, Span};

const DIRECTIVES: &[&str] = &["section", "byte", "word", "dword", "qword", "const", "align"];

/// Mnemonics, with or without a width suffix, and section directives.
fn is_keyword(word: &str) -> bool {
    DIRECTIVES.iter().any(|d| d.eq_ignore_ascii_case(word))
        || Opcode::from_sized_mnemonic(word).is_some()
}

#[derive(Debug, Clone)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,

    // No token has been emitted on this line yet, or the last one was ':'
    at_line_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Operators
    Plus,    // +
    Minus,   // -
    LParen,  // (
    RParen,  // )
    LSquare, // [
    RSquare, // ]
    Comma,   // ,
    Colon,   // :
    At,      // @
    Dot,     // .

    Instruction, // mov, byte, section ...
    Identifier,
    Register,       // %r0
    Immediate(u64), // $42
    Number(u64),    // 42, -8
    String,
}

impl Token {
    /// A number written with an explicit `+` or `-` glued to its digits.
    pub fn is_signed(&self) -> bool {
        matches!(self.kind, TokenKind::Number(_)) && self.literal.starts_with(['+', '-'])
    }

    pub fn span(&self) -> Span {
        Span::from(self)
    }
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        Lexer {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// Peek at the next character without consuming it.
    fn peek(&self) -> char {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    /// Peek, advance and return the peeked character.
    fn advance(&mut self) -> char {
        let peeked = self.peek();
        self.pos += 1;
        if peeked == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        peeked
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    fn token(&self, kind: TokenKind, literal: impl Into<String>, start: Span) -> Token {
        Token {
            kind,
            literal: literal.into(),
            line: start.line,
            column: start.column,
        }
    }

    fn scan_number(&mut self, start: Span) -> Result<(u64, String), LexError> {
        let mut literal = String::new();
        let negative = match self.peek() {
            '+' | '-' => {
                let sign = self.advance();
                literal.push(sign);
                sign == '-'
            }
            _ => false,
        };

        let mut base = 10;
        if self.peek() == '0' {
            let radix = match self.peek_ahead(1) {
                'x' | 'X' => 16,
                'b' | 'B' => 2,
                'o' | 'O' => 8,
                _ => 10,
            };
            if radix != 10 {
                base = radix;
                literal.push(self.advance());
                literal.push(self.advance());
            }
        }

        let mut digits = String::new();
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            let c = self.advance();
            literal.push(c);
            if c != '_' {
                digits.push(c);
            }
        }

        let value = u64::from_str_radix(&digits, base).map_err(|_| LexError::MalformedNumber {
            literal: literal.clone(),
            span: start,
        })?;
        let value = if negative { value.wrapping_neg() } else { value };

        Ok((value, literal))
    }

    fn lex_number(&mut self, start: Span) -> Result<Token, LexError> {
        let (value, literal) = self.scan_number(start)?;
        Ok(self.token(TokenKind::Number(value), literal, start))
    }

    fn lex_immediate(&mut self, start: Span) -> Result<Token, LexError> {
        self.advance(); // consume '$'
        let (value, literal) = self.scan_number(start)?;
        Ok(self.token(TokenKind::Immediate(value), format!("${literal}"), start))
    }

    fn lex_string(&mut self, start: Span) -> Result<Token, LexError> {
        let quote = self.advance();
        let mut value = String::new();

        loop {
            if self.pos >= self.chars.len() || self.peek() == '\n' {
                return Err(LexError::UnterminatedString { span: start });
            }

            match self.advance() {
                c if c == quote => break,
                '\\' => {
                    if self.pos >= self.chars.len() {
                        return Err(LexError::UnterminatedString { span: start });
                    }
                    // Handle character escape sequences
                    match self.advance() {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '0' => value.push('\0'),
                        c => value.push(c),
                    }
                }
                c => value.push(c),
            }
        }

        Ok(self.token(TokenKind::String, value, start))
    }

    // Lex things that are *like* identifiers: instructions, directives,
    // section and symbol names
    fn lex_ident_like(&mut self, start: Span) -> Token {
        let mut ident = String::new();
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            ident.push(self.advance());
        }

        let kind = if self.at_line_start && is_keyword(&ident) {
            TokenKind::Instruction
        } else {
            TokenKind::Identifier
        };
        self.token(kind, ident, start)
    }

    fn lex_register(&mut self, start: Span) -> Result<Token, LexError> {
        self.advance(); // consume '%'
        if !self.peek().is_alphanumeric() {
            return Err(LexError::UnexpectedChar {
                ch: '%',
                span: start,
            });
        }

        let mut name = String::new();
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            name.push(self.advance());
        }
        Ok(self.token(TokenKind::Register, name, start))
    }

    fn operator(&mut self, kind: TokenKind, start: Span) -> Token {
        let c = self.advance();
        self.token(kind, c, start)
    }

    pub fn lex(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let c = self.peek();
            let start = self.span();

            let token = match c {
                '\0' if self.pos >= self.chars.len() => break,
                ';' => {
                    // Skip line comment
                    while self.peek() != '\n' && self.pos < self.chars.len() {
                        self.advance();
                    }
                    continue;
                }
                '\n' => {
                    self.advance();
                    self.at_line_start = true;
                    continue;
                }
                _ if c.is_whitespace() => {
                    self.advance();
                    continue;
                }

                '+' | '-' if self.peek_ahead(1).is_ascii_digit() => self.lex_number(start)?,
                '+' => self.operator(TokenKind::Plus, start),
                '-' => self.operator(TokenKind::Minus, start),
                '(' => self.operator(TokenKind::LParen, start),
                ')' => self.operator(TokenKind::RParen, start),
                '[' => self.operator(TokenKind::LSquare, start),
                ']' => self.operator(TokenKind::RSquare, start),
                ',' => self.operator(TokenKind::Comma, start),
                ':' => self.operator(TokenKind::Colon, start),
                '@' => self.operator(TokenKind::At, start),
                '.' => self.operator(TokenKind::Dot, start),

                '0'..='9' => self.lex_number(start)?,
                '$' => self.lex_immediate(start)?,
                '%' => self.lex_register(start)?,
                '"' | '\'' => self.lex_string(start)?,

                // Identifiers/Instructions
                _ if c.is_alphabetic() || c == '_' => self.lex_ident_like(start),
                _ => return Err(LexError::UnexpectedChar { ch: c, span: start }),
            };

            self.at_line_start = token.kind == TokenKind::Colon;
            tokens.push(token);
        }

        Ok(tokens)
    }
}

/// Tokenize a whole source text.
pub fn lex(src: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(src).lex()
}

// Tests
#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_skips_comments() {
        let tokens = lex("; this is a comment\nnop ; trailing\n").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Instruction);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn lex_number() {
        assert_eq!(
            kinds("push 123 0xff 0b0010 0o17"),
            vec![
                TokenKind::Instruction,
                TokenKind::Number(123),
                TokenKind::Number(0xFF),
                TokenKind::Number(0b0010),
                TokenKind::Number(0o17),
            ]
        );
    }

    #[test]
    fn lex_signed_displacement() {
        let tokens = lex("ld -8(%bp), %r1").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Number((-8i64) as u64));
        assert!(tokens[1].is_signed());
        assert_eq!(tokens[2].kind, TokenKind::LParen);
        assert_eq!(tokens[3].kind, TokenKind::Register);
        assert_eq!(tokens[3].literal, "bp");
    }

    #[test]
    fn lex_spaced_sign_is_an_operator() {
        assert_eq!(
            kinds("mov msg + 4"),
            vec![
                TokenKind::Instruction,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Number(4),
            ]
        );
    }

    #[test]
    fn lex_immediate() {
        let tokens = lex("push $0x10\npush $-1").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Immediate(16));
        assert_eq!(tokens[1].literal, "$0x10");
        assert_eq!(tokens[3].kind, TokenKind::Immediate(u64::MAX));
    }

    #[test]
    fn lex_string() {
        let tokens = lex("byte s \"a\\tb\\n\\0\" 'x'").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].literal, "a\tb\n\0");
        assert_eq!(tokens[3].literal, "x");
    }

    #[test]
    fn lex_unterminated_string() {
        assert!(matches!(
            lex("byte s \"abc\nnop"),
            Err(LexError::UnterminatedString { .. })
        ));
        assert!(matches!(
            lex("byte s \"abc"),
            Err(LexError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn lex_first_word_is_instruction() {
        assert_eq!(
            kinds("@main: mov %r1, %r2\n.loop:\n  end"),
            vec![
                TokenKind::At,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Instruction,
                TokenKind::Register,
                TokenKind::Comma,
                TokenKind::Register,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Instruction,
            ]
        );
    }

    #[test]
    fn continuation_lines_start_with_identifiers() {
        assert_eq!(
            kinds("byte list 1,\n  LIMIT, 2\nmovb $1, %r0"),
            vec![
                TokenKind::Instruction,
                TokenKind::Identifier,
                TokenKind::Number(1),
                TokenKind::Comma,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Number(2),
                TokenKind::Instruction,
                TokenKind::Immediate(1),
                TokenKind::Comma,
                TokenKind::Register,
            ]
        );
    }

    #[test]
    fn lex_positions() {
        let tokens = lex("nop\n  mov $1, %r0").unwrap();
        let mov = &tokens[1];
        assert_eq!((mov.line, mov.column), (2, 3));
        let reg = &tokens[4];
        assert_eq!((reg.line, reg.column), (2, 11));
    }

    #[test]
    fn lex_malformed_number() {
        assert!(matches!(
            lex("push 12ab"),
            Err(LexError::MalformedNumber { .. })
        ));
        assert!(matches!(
            lex("push $"),
            Err(LexError::MalformedNumber { .. })
        ));
        assert!(matches!(lex("push #"), Err(LexError::UnexpectedChar { ch: '#', .. })));
    }

    #[test]
    fn arithmetic_operators_are_not_tokens() {
        assert!(matches!(
            lex("mov 2*3, %r0"),
            Err(LexError::UnexpectedChar { ch: '*', .. })
        ));
        assert!(matches!(
            lex("mov 6/3, %r0"),
            Err(LexError::UnexpectedChar { ch: '/', .. })
        ));
    }
}
