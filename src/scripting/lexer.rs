//! Tokenizer for the script language.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(Bytes),
    Name(String),

    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Hash,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Assign,
    Concat,
    Dots,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
    Eof,
}

impl Token {
    /// How the token is quoted in "near ..." error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("'{}'", n),
            Token::Str(s) => format!("'{}'", String::from_utf8_lossy(s)),
            Token::Name(n) => format!("'{}'", n),
            Token::Eof => "<eof>".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::And => "and",
            Token::Break => "break",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Hash => "#",
            Token::EqEq => "==",
            Token::NotEq => "~=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::LtEq => "<=",
            Token::GtEq => ">=",
            Token::Assign => "=",
            Token::Concat => "..",
            Token::Dots => "...",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Number(_) | Token::Str(_) | Token::Name(_) | Token::Eof => "",
        }
    }
}

/// A compile error with the line it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    /// Tokenizes the whole source. Each token carries its line number.
    pub fn tokenize(mut self) -> Result<Vec<(Token, u32)>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push((token, line));
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if let Some(level) = self.long_bracket_level() {
                        self.read_long_bracket(level)?;
                    } else {
                        while let Some(b) = self.peek() {
                            if b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If a long bracket `[==[` starts here, consumes it and returns its level.
    fn long_bracket_level(&mut self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) != Some(b'[') {
            return None;
        }
        self.pos += level + 2;
        Some(level)
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<Bytes, SyntaxError> {
        if self.peek() == Some(b'\r') {
            self.bump();
        }
        if self.peek() == Some(b'\n') {
            self.bump();
        }
        let start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("unfinished long string/comment near '<eof>'")),
                Some(b']') => {
                    let closes = (0..level).all(|i| self.peek_at(1 + i) == Some(b'='))
                        && self.peek_at(1 + level) == Some(b']');
                    if closes {
                        let body = Bytes::copy_from_slice(&self.src[start..self.pos]);
                        self.pos += level + 2;
                        return Ok(body);
                    }
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn read_string(&mut self, quote: u8) -> Result<Bytes, SyntaxError> {
        let mut buf = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(self.error("unfinished string near '<eof>'"));
            };
            match b {
                b'\n' => return Err(self.error("unfinished string")),
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(self.error("unfinished string near '<eof>'"));
                    };
                    match esc {
                        b'n' => buf.push(b'\n'),
                        b't' => buf.push(b'\t'),
                        b'r' => buf.push(b'\r'),
                        b'a' => buf.push(0x07),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0c),
                        b'v' => buf.push(0x0b),
                        b'\n' => buf.push(b'\n'),
                        b'0'..=b'9' => {
                            let mut code = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d) if d.is_ascii_digit() => {
                                        code = code * 10 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            let byte = u8::try_from(code).map_err(|_| self.error("escape sequence too large"))?;
                            buf.push(byte);
                        }
                        other => buf.push(other),
                    }
                }
                b if b == quote => return Ok(Bytes::from(buf)),
                b => buf.push(b),
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            while self.peek().is_some_and(|d| d.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[start + 2..self.pos]).unwrap_or("");
            return u64::from_str_radix(digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| self.error("malformed number"));
        }

        while self.peek().is_some_and(|d| d.is_ascii_digit() || d == b'.') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|d| d.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            return Err(self.error(format!("malformed number near '{}'", text)));
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("malformed number near '{}'", text)))
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };

        if b.is_ascii_digit() || (b == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.read_number();
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            let word = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
            return Ok(keyword(&word).unwrap_or(Token::Name(word)));
        }

        if b == b'[' {
            if let Some(level) = self.long_bracket_level() {
                return self.read_long_bracket(level).map(Token::Str);
            }
        }

        self.pos += 1;
        let two = |lexer: &mut Self, next: u8, yes: Token, no: Token| {
            if lexer.peek() == Some(next) {
                lexer.pos += 1;
                yes
            } else {
                no
            }
        };

        let token = match b {
            b'"' | b'\'' => Token::Str(self.read_string(b)?),
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'^' => Token::Caret,
            b'#' => Token::Hash,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b',' => Token::Comma,
            b';' => Token::Semi,
            b':' => Token::Colon,
            b'=' => two(self, b'=', Token::EqEq, Token::Assign),
            b'<' => two(self, b'=', Token::LtEq, Token::Lt),
            b'>' => two(self, b'=', Token::GtEq, Token::Gt),
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::NotEq
                } else {
                    return Err(self.error("unexpected symbol near '~'"));
                }
            }
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.pos += 1;
                    two(self, b'.', Token::Dots, Token::Concat)
                } else {
                    Token::Dot
                }
            }
            other => {
                return Err(self.error(format!("unexpected symbol near '{}'", other as char)));
            }
        };
        Ok(token)
    }
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::ElseIf,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src.as_bytes())
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            tokens("local x = 1 .. 'a'"),
            vec![
                Token::Local,
                Token::Name("x".into()),
                Token::Assign,
                Token::Number(1.0),
                Token::Concat,
                Token::Str(Bytes::from("a")),
                Token::Eof,
            ]
        );
        assert_eq!(
            tokens("a ~= b ... <= 0x1F 1e2 .5"),
            vec![
                Token::Name("a".into()),
                Token::NotEq,
                Token::Name("b".into()),
                Token::Dots,
                Token::LtEq,
                Token::Number(31.0),
                Token::Number(100.0),
                Token::Number(0.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            tokens("-- comment\n\"a\\tb\\65\" --[[ long\ncomment ]] [==[raw]]x]==]"),
            vec![
                Token::Str(Bytes::from("a\tbA")),
                Token::Str(Bytes::from("raw]]x")),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let toks = Lexer::new(b"a\nb\n\nc").tokenize().unwrap();
        let lines: Vec<u32> = toks.iter().map(|(_, l)| *l).collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }

    #[test]
    fn test_errors() {
        let err = Lexer::new(b"x = 'open").tokenize().unwrap_err();
        assert!(err.message.contains("unfinished string"));
        assert!(Lexer::new(b"x = 3abc").tokenize().is_err());
        assert!(Lexer::new(b"x ~ y").tokenize().is_err());
    }
}
