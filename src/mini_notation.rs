//! Mini-notation parser: the textual pattern language.
//!
//! Recognizes the TidalCycles-family surface:
//!
//! - `a b c` — sequence; `,` inside brackets layers a stack
//! - `<a b>` — alternation, one element per cycle
//! - `[a b]` — grouping
//! - `~` or `-` — rest
//! - `a*2`, `a/2` — speed up / slow down (arguments may be `<…>` patterns)
//! - `a@3` — weight inside a sequence
//! - `a!3` — replication
//! - `bd:2` / `bd:2:0.8` — sample index and per-event gain
//! - `bd(3,8)` / `bd(3,8,2)` — euclidean rhythm
//! - `a?` / `a?0.3` — random degrade
//! - backticks wrap multi-line patterns
//!
//! Parse errors carry a `(line, column)` position, composed with the
//! caller-supplied base location so a front end can highlight the offending
//! character in a larger document.

use crate::control::Value;
use crate::error::ParseError;
use crate::fraction::Fraction;
use crate::pattern::{Pattern, SourcePos, State, TimeSpan};

/// Tokens of the mini-notation, each tagged with its source position.
#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Word(String),
    Number(f64),
    Rest,
    OpenBracket,
    CloseBracket,
    OpenAngle,
    CloseAngle,
    OpenParen,
    CloseParen,
    Comma,
    Star,
    Slash,
    Colon,
    At,
    Bang,
    Question,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: SourcePos,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn read_word(&mut self, first: char) -> String {
        let mut word = String::new();
        word.push(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '\'' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn read_number(&mut self, first: char) -> Result<f64, ParseError> {
        let pos = self.pos();
        let mut text = String::new();
        text.push(first);
        let mut seen_dot = first == '.';
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        text.parse()
            .map_err(|_| ParseError::new(pos, format!("malformed number {:?}", text)))
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            let pos = self.pos();
            // Backticks only delimit multi-line patterns; whitespace
            // (including newlines) separates sequence steps
            if c.is_whitespace() || c == '`' {
                self.bump();
                continue;
            }
            let kind = match c {
                '~' => {
                    self.bump();
                    TokenKind::Rest
                }
                '-' => {
                    self.bump();
                    if self.chars.peek().map_or(false, |n| n.is_ascii_digit()) {
                        let n = self.read_number('-')?;
                        TokenKind::Number(n)
                    } else {
                        TokenKind::Rest
                    }
                }
                '[' => {
                    self.bump();
                    TokenKind::OpenBracket
                }
                ']' => {
                    self.bump();
                    TokenKind::CloseBracket
                }
                '<' => {
                    self.bump();
                    TokenKind::OpenAngle
                }
                '>' => {
                    self.bump();
                    TokenKind::CloseAngle
                }
                '(' => {
                    self.bump();
                    TokenKind::OpenParen
                }
                ')' => {
                    self.bump();
                    TokenKind::CloseParen
                }
                ',' => {
                    self.bump();
                    TokenKind::Comma
                }
                '*' => {
                    self.bump();
                    TokenKind::Star
                }
                '/' => {
                    self.bump();
                    TokenKind::Slash
                }
                ':' => {
                    self.bump();
                    TokenKind::Colon
                }
                '@' => {
                    self.bump();
                    TokenKind::At
                }
                '!' => {
                    self.bump();
                    TokenKind::Bang
                }
                '?' => {
                    self.bump();
                    TokenKind::Question
                }
                '0'..='9' | '.' => {
                    self.bump();
                    TokenKind::Number(self.read_number(c)?)
                }
                c if c.is_alphabetic() || c == '_' => {
                    self.bump();
                    TokenKind::Word(self.read_word(c))
                }
                other => {
                    return Err(ParseError::new(
                        pos,
                        format!("unexpected character {:?}", other),
                    ))
                }
            };
            tokens.push(Token { kind, pos });
        }
        Ok(tokens)
    }
}

/// Parsed syntax tree. Public so callers can pretty-print and compare
/// pattern structure without querying.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// A word atom, optionally with `:index` and `:gain` suffixes.
    Name {
        name: String,
        index: Option<u32>,
        gain: Option<f64>,
    },
    Number(f64),
    Rest,
    /// Weighted sequence within one cycle.
    Seq(Vec<(Fraction, Ast)>),
    Stack(Vec<Ast>),
    Alt(Vec<Ast>),
    Fast(Box<Ast>, Box<Ast>),
    Slow(Box<Ast>, Box<Ast>),
    Euclid {
        subject: Box<Ast>,
        pulses: Box<Ast>,
        steps: Box<Ast>,
        rotation: Option<Box<Ast>>,
    },
    Degrade(Box<Ast>, f64),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    end: SourcePos,
}

impl Parser {
    fn new(tokens: Vec<Token>, end: SourcePos) -> Self {
        Self {
            tokens,
            position: 0,
            end,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn current_pos(&self) -> SourcePos {
        self.current().map(|t| t.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        match self.current() {
            Some(t) if t.kind == kind => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(ParseError::new(
                t.pos,
                format!("expected {}, found {:?}", what, t.kind),
            )),
            None => Err(ParseError::new(
                self.end,
                format!("expected {}, found end of input", what),
            )),
        }
    }

    /// Top level: sequences separated by commas form a stack.
    fn parse(&mut self) -> Result<Ast, ParseError> {
        let node = self.parse_stack_or_seq(None)?;
        if let Some(t) = self.current() {
            return Err(ParseError::new(
                t.pos,
                format!("unexpected {:?}", t.kind),
            ));
        }
        Ok(node)
    }

    fn parse_stack_or_seq(&mut self, close: Option<&TokenKind>) -> Result<Ast, ParseError> {
        let mut layers = vec![self.parse_sequence(close)?];
        while matches!(self.current().map(|t| &t.kind), Some(TokenKind::Comma)) {
            self.advance();
            layers.push(self.parse_sequence(close)?);
        }
        Ok(if layers.len() == 1 {
            layers.pop().unwrap_or(Ast::Rest)
        } else {
            Ast::Stack(layers)
        })
    }

    fn parse_sequence(&mut self, close: Option<&TokenKind>) -> Result<Ast, ParseError> {
        let mut children: Vec<(Fraction, Ast)> = Vec::new();
        loop {
            match self.current().map(|t| &t.kind) {
                None | Some(TokenKind::Comma) => break,
                Some(kind) if Some(kind) == close => break,
                Some(TokenKind::CloseBracket)
                | Some(TokenKind::CloseAngle)
                | Some(TokenKind::CloseParen) => break,
                _ => {}
            }
            let (node, weight, copies) = self.parse_element()?;
            for _ in 0..copies {
                children.push((weight, node.clone()));
            }
        }
        Ok(match children.len() {
            0 => Ast::Rest,
            1 if children[0].0 == Fraction::ONE => children.pop_value(),
            _ => Ast::Seq(children),
        })
    }

    /// One sequence element plus its postfix operators. Returns the node,
    /// its weight (`@w`) and its replication count (`!k`).
    fn parse_element(&mut self) -> Result<(Ast, Fraction, usize), ParseError> {
        let mut node = self.parse_term()?;
        let mut weight = Fraction::ONE;
        let mut copies = 1usize;
        loop {
            match self.current().map(|t| (t.kind.clone(), t.pos)) {
                Some((TokenKind::Star, pos)) => {
                    self.advance();
                    let arg = self.parse_argument(pos)?;
                    self.reject_zero_factor(&arg, pos)?;
                    node = Ast::Fast(Box::new(node), Box::new(arg));
                }
                Some((TokenKind::Slash, pos)) => {
                    self.advance();
                    let arg = self.parse_argument(pos)?;
                    self.reject_zero_factor(&arg, pos)?;
                    node = Ast::Slow(Box::new(node), Box::new(arg));
                }
                Some((TokenKind::At, pos)) => {
                    self.advance();
                    match self.advance().map(|t| t.kind) {
                        Some(TokenKind::Number(w)) if w > 0.0 => {
                            weight = Fraction::from_float(w);
                        }
                        Some(TokenKind::Number(w)) => {
                            return Err(ParseError::new(
                                pos,
                                format!("weight must be positive, got {}", w),
                            ))
                        }
                        _ => {
                            return Err(ParseError::new(pos, "expected a number after '@'"))
                        }
                    }
                }
                Some((TokenKind::Bang, pos)) => {
                    self.advance();
                    match self.current().map(|t| t.kind.clone()) {
                        Some(TokenKind::Number(n)) if n >= 1.0 => {
                            self.advance();
                            copies = n as usize;
                        }
                        Some(TokenKind::Number(n)) => {
                            return Err(ParseError::new(
                                pos,
                                format!("replication count must be at least 1, got {}", n),
                            ))
                        }
                        // Bare `!` repeats once more
                        _ => copies += 1,
                    }
                }
                Some((TokenKind::Question, _)) => {
                    self.advance();
                    let prob = match self.current().map(|t| t.kind.clone()) {
                        Some(TokenKind::Number(p)) => {
                            self.advance();
                            p
                        }
                        _ => 0.5,
                    };
                    node = Ast::Degrade(Box::new(node), prob);
                }
                Some((TokenKind::OpenParen, pos)) => {
                    self.advance();
                    let pulses = self.parse_argument(pos)?;
                    self.expect(TokenKind::Comma, "','")?;
                    let steps_pos = self.current_pos();
                    let steps = self.parse_argument(steps_pos)?;
                    if let Ast::Number(s) = &steps {
                        if *s < 1.0 {
                            return Err(ParseError::new(
                                steps_pos,
                                format!("euclidean steps must be positive, got {}", *s),
                            ));
                        }
                    }
                    let rotation =
                        if matches!(self.current().map(|t| &t.kind), Some(TokenKind::Comma)) {
                            self.advance();
                            let rot_pos = self.current_pos();
                            Some(Box::new(self.parse_argument(rot_pos)?))
                        } else {
                            None
                        };
                    self.expect(TokenKind::CloseParen, "')'")?;
                    node = Ast::Euclid {
                        subject: Box::new(node),
                        pulses: Box::new(pulses),
                        steps: Box::new(steps),
                        rotation,
                    };
                }
                _ => break,
            }
        }
        Ok((node, weight, copies))
    }

    fn reject_zero_factor(&self, arg: &Ast, pos: SourcePos) -> Result<(), ParseError> {
        if let Ast::Number(n) = arg {
            if *n <= 0.0 {
                return Err(ParseError::new(
                    pos,
                    format!("time factor must be positive, got {}", n),
                ));
            }
        }
        Ok(())
    }

    fn parse_term(&mut self) -> Result<Ast, ParseError> {
        let token = match self.advance() {
            Some(t) => t,
            None => return Err(ParseError::new(self.end, "unexpected end of input")),
        };
        match token.kind {
            TokenKind::Word(name) => {
                let mut index = None;
                let mut gain = None;
                // `name:idx` and `name:idx:gain`
                if matches!(self.current().map(|t| &t.kind), Some(TokenKind::Colon)) {
                    self.advance();
                    match self.advance().map(|t| t.kind) {
                        Some(TokenKind::Number(n)) if n >= 0.0 => index = Some(n as u32),
                        _ => {
                            return Err(ParseError::new(
                                token.pos,
                                "expected a sample index after ':'",
                            ))
                        }
                    }
                    if matches!(self.current().map(|t| &t.kind), Some(TokenKind::Colon)) {
                        self.advance();
                        match self.advance().map(|t| t.kind) {
                            Some(TokenKind::Number(g)) => gain = Some(g),
                            _ => {
                                return Err(ParseError::new(
                                    token.pos,
                                    "expected a gain after second ':'",
                                ))
                            }
                        }
                    }
                }
                Ok(Ast::Name { name, index, gain })
            }
            TokenKind::Number(n) => Ok(Ast::Number(n)),
            TokenKind::Rest => Ok(Ast::Rest),
            TokenKind::OpenBracket => {
                let node = self.parse_stack_or_seq(Some(&TokenKind::CloseBracket))?;
                self.expect(TokenKind::CloseBracket, "']'")?;
                Ok(node)
            }
            TokenKind::OpenAngle => {
                let mut options = Vec::new();
                while !matches!(
                    self.current().map(|t| &t.kind),
                    None | Some(TokenKind::CloseAngle)
                ) {
                    let (node, weight, copies) = self.parse_element()?;
                    // Inside alternation a weight of w holds the branch for
                    // w consecutive cycles
                    for _ in 0..copies * alternation_repeats(weight) {
                        options.push(node.clone());
                    }
                }
                self.expect(TokenKind::CloseAngle, "'>'")?;
                Ok(Ast::Alt(options))
            }
            other => Err(ParseError::new(
                token.pos,
                format!("unexpected {:?}", other),
            )),
        }
    }

    /// Euclid and speed arguments: a number, a word, or an alternation.
    fn parse_argument(&mut self, pos: SourcePos) -> Result<Ast, ParseError> {
        match self.current().map(|t| t.kind.clone()) {
            Some(TokenKind::Number(n)) => {
                self.advance();
                Ok(Ast::Number(n))
            }
            Some(TokenKind::Word(w)) => {
                self.advance();
                Ok(Ast::Name {
                    name: w,
                    index: None,
                    gain: None,
                })
            }
            Some(TokenKind::OpenAngle) => self.parse_term_after(TokenKind::OpenAngle),
            Some(TokenKind::OpenBracket) => self.parse_term_after(TokenKind::OpenBracket),
            _ => Err(ParseError::new(pos, "expected an argument")),
        }
    }

    fn parse_term_after(&mut self, open: TokenKind) -> Result<Ast, ParseError> {
        // Re-dispatch through parse_term by rewinding is messier than just
        // consuming the opener here
        match open {
            TokenKind::OpenAngle => {
                self.advance();
                let mut options = Vec::new();
                while !matches!(
                    self.current().map(|t| &t.kind),
                    None | Some(TokenKind::CloseAngle)
                ) {
                    let (node, weight, copies) = self.parse_element()?;
                    // Inside alternation a weight of w holds the branch for
                    // w consecutive cycles
                    for _ in 0..copies * alternation_repeats(weight) {
                        options.push(node.clone());
                    }
                }
                self.expect(TokenKind::CloseAngle, "'>'")?;
                Ok(Ast::Alt(options))
            }
            _ => {
                self.advance();
                let node = self.parse_stack_or_seq(Some(&TokenKind::CloseBracket))?;
                self.expect(TokenKind::CloseBracket, "']'")?;
                Ok(node)
            }
        }
    }
}

/// `@w` inside `<…>` repeats the branch for `w` cycles (whole weights
/// only; fractional weights hold for one cycle).
fn alternation_repeats(weight: Fraction) -> usize {
    if weight.denominator() == 1 && weight.numerator() > 1 {
        weight.numerator() as usize
    } else {
        1
    }
}

trait PopValue {
    fn pop_value(self) -> Ast;
}

impl PopValue for Vec<(Fraction, Ast)> {
    fn pop_value(mut self) -> Ast {
        self.pop().map(|(_, a)| a).unwrap_or(Ast::Rest)
    }
}

/// Parse mini-notation into its syntax tree.
pub fn parse_ast(input: &str) -> Result<Ast, ParseError> {
    let tokenizer = Tokenizer::new(input);
    // Track where the input ends for end-of-input errors
    let mut end = SourcePos::new(1, 1);
    for (i, line) in input.lines().enumerate() {
        end = SourcePos::new(i as u32 + 1, line.chars().count() as u32 + 1);
    }
    let tokens = tokenizer.tokenize()?;
    Parser::new(tokens, end).parse()
}

/// Parse mini-notation into a queryable pattern of values.
pub fn parse_mini_notation(input: &str) -> Result<Pattern<Value>, ParseError> {
    parse_ast(input).map(|ast| ast_to_pattern(&ast))
}

/// Parse with a base source location; errors are re-anchored against it.
pub fn parse_mini_notation_at(
    input: &str,
    base: SourcePos,
) -> Result<Pattern<Value>, ParseError> {
    parse_mini_notation(input).map_err(|e| e.offset_by(base))
}

/// Sample an argument pattern at the start of the current cycle. Used for
/// pattern-valued operator arguments (`bd(<3 4>,8)`, `a*<2 3>`).
fn sample_at_cycle_start(pat: &Pattern<Value>, state: &State) -> Option<Value> {
    let cycle = state.span.begin.sam();
    let point = TimeSpan::new(cycle, cycle);
    pat.query(&state.with_span(point))
        .into_iter()
        .next()
        .map(|h| h.value)
}

fn sample_number(pat: &Pattern<Value>, state: &State, fallback: f64) -> f64 {
    sample_at_cycle_start(pat, state)
        .and_then(|v| v.as_f64())
        .unwrap_or(fallback)
}

/// Lower a syntax tree to a queryable pattern.
pub fn ast_to_pattern(ast: &Ast) -> Pattern<Value> {
    match ast {
        Ast::Name { name, index, gain } => Pattern::pure(Value::Name {
            name: name.clone(),
            index: *index,
            gain: *gain,
        }),
        Ast::Number(n) => Pattern::pure(Value::Num(*n)),
        Ast::Rest => Pattern::silence(),
        Ast::Seq(children) => Pattern::timecat(
            children
                .iter()
                .map(|(w, c)| (*w, ast_to_pattern(c)))
                .collect(),
        ),
        Ast::Stack(layers) => Pattern::stack(layers.iter().map(ast_to_pattern).collect()),
        Ast::Alt(options) => Pattern::slowcat(options.iter().map(ast_to_pattern).collect()),
        Ast::Fast(subject, arg) => scaled_pattern(subject, arg, false),
        Ast::Slow(subject, arg) => scaled_pattern(subject, arg, true),
        Ast::Euclid {
            subject,
            pulses,
            steps,
            rotation,
        } => {
            let subject_pat = ast_to_pattern(subject);
            match (pulses.as_ref(), steps.as_ref(), rotation.as_deref()) {
                // All-literal arguments: build the bit mask once
                (Ast::Number(p), Ast::Number(s), None) => {
                    subject_pat.euclid(*p as usize, *s as usize, 0)
                }
                (Ast::Number(p), Ast::Number(s), Some(Ast::Number(r))) => {
                    subject_pat.euclid(*p as usize, *s as usize, *r as i64)
                }
                _ => {
                    let pulses_pat = ast_to_pattern(pulses);
                    let steps_pat = ast_to_pattern(steps);
                    let rot_pat = rotation.as_deref().map(ast_to_pattern);
                    Pattern::new(move |state| {
                        let p = sample_number(&pulses_pat, state, 1.0).max(0.0) as usize;
                        let s = sample_number(&steps_pat, state, 8.0).max(0.0) as usize;
                        let r = rot_pat
                            .as_ref()
                            .map(|rp| sample_number(rp, state, 0.0) as i64)
                            .unwrap_or(0);
                        subject_pat.euclid(p, s, r).query(state)
                    })
                    .split_queries()
                }
            }
        }
        Ast::Degrade(subject, prob) => ast_to_pattern(subject).degrade_by(*prob),
    }
}

fn scaled_pattern(subject: &Ast, arg: &Ast, slow: bool) -> Pattern<Value> {
    let subject_pat = ast_to_pattern(subject);
    if let Ast::Number(n) = arg {
        let factor = Fraction::from_float(*n);
        return if slow {
            subject_pat.slow(factor)
        } else {
            subject_pat.fast(factor)
        };
    }
    let arg_pat = ast_to_pattern(arg);
    Pattern::new(move |state| {
        let n = sample_number(&arg_pat, state, 1.0);
        if n <= 0.0 {
            return Vec::new();
        }
        let factor = Fraction::from_float(n);
        let scaled = if slow {
            subject_pat.slow(factor)
        } else {
            subject_pat.fast(factor)
        };
        scaled.query(state)
    })
    .split_queries()
}

impl std::fmt::Display for Ast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn number(n: f64) -> String {
            if n.fract() == 0.0 {
                format!("{}", n as i64)
            } else {
                format!("{}", n)
            }
        }
        match self {
            Ast::Name { name, index, gain } => {
                write!(f, "{}", name)?;
                if let Some(i) = index {
                    write!(f, ":{}", i)?;
                }
                if let Some(g) = gain {
                    write!(f, ":{}", number(*g))?;
                }
                Ok(())
            }
            Ast::Number(n) => write!(f, "{}", number(*n)),
            Ast::Rest => write!(f, "~"),
            Ast::Seq(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|(w, c)| {
                        let inner = match c {
                            Ast::Seq(_) | Ast::Stack(_) => format!("[{}]", c),
                            _ => format!("{}", c),
                        };
                        if *w == Fraction::ONE {
                            inner
                        } else if w.denominator() == 1 {
                            format!("{}@{}", inner, w.numerator())
                        } else {
                            // Fractional weights print as decimals so the
                            // text stays parseable
                            format!("{}@{}", inner, w.to_float())
                        }
                    })
                    .collect();
                write!(f, "{}", parts.join(" "))
            }
            Ast::Stack(layers) => {
                let parts: Vec<String> = layers.iter().map(|l| format!("{}", l)).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Ast::Alt(options) => {
                let parts: Vec<String> = options.iter().map(|o| format!("{}", o)).collect();
                write!(f, "<{}>", parts.join(" "))
            }
            Ast::Fast(s, a) => write!(f, "{}*{}", wrap(s), a),
            Ast::Slow(s, a) => write!(f, "{}/{}", wrap(s), a),
            Ast::Euclid {
                subject,
                pulses,
                steps,
                rotation,
            } => {
                write!(f, "{}({},{}", wrap(subject), pulses, steps)?;
                if let Some(r) = rotation {
                    write!(f, ",{}", r)?;
                }
                write!(f, ")")
            }
            Ast::Degrade(s, p) => {
                if (*p - 0.5).abs() < f64::EPSILON {
                    write!(f, "{}?", wrap(s))
                } else {
                    write!(f, "{}?{}", wrap(s), p)
                }
            }
        }
    }
}

fn wrap(ast: &Ast) -> String {
    match ast {
        Ast::Seq(_) | Ast::Stack(_) => format!("[{}]", ast),
        _ => format!("{}", ast),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d)
    }

    fn names(haps: &[crate::pattern::Hap<Value>]) -> Vec<String> {
        let mut hs: Vec<_> = haps.iter().collect();
        hs.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        hs.iter()
            .map(|h| match &h.value {
                Value::Name { name, .. } => name.clone(),
                Value::Num(n) => n.to_string(),
                other => format!("{:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_sequence_timing() {
        let p = parse_mini_notation("c d e f").unwrap();
        let mut haps = p.query_arc(frac(0, 1), frac(1, 1));
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        assert_eq!(haps.len(), 4);
        for (i, h) in haps.iter().enumerate() {
            assert_eq!(h.part.begin, frac(i as i64, 4));
            assert_eq!(h.part.duration(), frac(1, 4));
            assert!(h.has_onset());
        }
        assert_eq!(names(&haps), vec!["c", "d", "e", "f"]);
    }

    #[test]
    fn test_rests() {
        let p = parse_mini_notation("bd ~ sn -").unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        assert_eq!(haps.len(), 2);
    }

    #[test]
    fn test_weights() {
        let p = parse_mini_notation("a@3 b").unwrap();
        let mut haps = p.query_arc(frac(0, 1), frac(1, 1));
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        assert_eq!(haps[0].part.duration(), frac(3, 4));
        assert_eq!(haps[1].part.duration(), frac(1, 4));
    }

    #[test]
    fn test_replicate() {
        let p = parse_mini_notation("bd!3 sn").unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        assert_eq!(haps.len(), 4);
        let bd = haps
            .iter()
            .filter(|h| matches!(&h.value, Value::Name { name, .. } if name == "bd"))
            .count();
        assert_eq!(bd, 3);
    }

    #[test]
    fn test_alternation() {
        let p = parse_mini_notation("<bd sn cp>").unwrap();
        for (cycle, expected) in [(0, "bd"), (1, "sn"), (2, "cp"), (3, "bd")] {
            let haps = p.query_arc(frac(cycle, 1), frac(cycle + 1, 1));
            assert_eq!(haps.len(), 1, "cycle {}", cycle);
            assert_eq!(names(&haps), vec![expected], "cycle {}", cycle);
        }
    }

    #[test]
    fn test_empty_alternation() {
        let p = parse_mini_notation("<>").unwrap();
        assert!(p.query_arc(frac(0, 1), frac(1, 1)).is_empty());
    }

    #[test]
    fn test_grouping_and_stack() {
        let p = parse_mini_notation("[bd sn, hh hh hh]").unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        assert_eq!(haps.len(), 5);
    }

    #[test]
    fn test_fast_and_slow_operators() {
        let p = parse_mini_notation("bd*4").unwrap();
        assert_eq!(p.query_arc(frac(0, 1), frac(1, 1)).len(), 4);
        let p = parse_mini_notation("bd/2").unwrap();
        let onsets: usize = (0..2)
            .map(|c| {
                p.query_arc(frac(c, 1), frac(c + 1, 1))
                    .iter()
                    .filter(|h| h.has_onset())
                    .count()
            })
            .sum();
        assert_eq!(onsets, 1);
    }

    #[test]
    fn test_fast_with_alternating_factor() {
        let p = parse_mini_notation("bd*<1 2>").unwrap();
        assert_eq!(p.query_arc(frac(0, 1), frac(1, 1)).len(), 1);
        assert_eq!(p.query_arc(frac(1, 1), frac(2, 1)).len(), 2);
    }

    #[test]
    fn test_euclid() {
        let p = parse_mini_notation("bd(3,8)").unwrap();
        let mut haps = p.query_arc(frac(0, 1), frac(1, 1));
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        assert_eq!(haps.len(), 3);
        assert_eq!(haps[0].part.begin, frac(0, 1));
        assert_eq!(haps[1].part.begin, frac(3, 8));
        assert_eq!(haps[2].part.begin, frac(6, 8));
        for h in &haps {
            assert_eq!(h.part.duration(), frac(1, 8));
        }
    }

    #[test]
    fn test_euclid_with_alternating_pulses() {
        let p = parse_mini_notation("bd(<3 4>,8)").unwrap();
        assert_eq!(p.query_arc(frac(0, 1), frac(1, 1)).len(), 3);
        assert_eq!(p.query_arc(frac(1, 1), frac(2, 1)).len(), 4);
    }

    #[test]
    fn test_sample_index_and_gain() {
        let p = parse_mini_notation("bd:2:0.8").unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        match &haps[0].value {
            Value::Name { name, index, gain } => {
                assert_eq!(name, "bd");
                assert_eq!(*index, Some(2));
                assert_eq!(*gain, Some(0.8));
            }
            other => panic!("expected a name atom, got {:?}", other),
        }
    }

    #[test]
    fn test_multiline_backticks() {
        let p = parse_mini_notation("`bd sn\nhh cp`").unwrap();
        assert_eq!(p.query_arc(frac(0, 1), frac(1, 1)).len(), 4);
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_mini_notation("bd sn ]").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 7);
        let err = parse_mini_notation("bd\nsn )").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 4);
    }

    #[test]
    fn test_zero_speed_factor_is_an_error() {
        assert!(parse_mini_notation("bd*0").is_err());
        assert!(parse_mini_notation("bd/0").is_err());
    }

    #[test]
    fn test_unclosed_bracket_is_an_error() {
        assert!(parse_mini_notation("[bd sn").is_err());
        assert!(parse_mini_notation("<bd sn").is_err());
    }

    #[test]
    fn test_pretty_print_round_trip() {
        for src in [
            "bd sn hh cp",
            "bd:2 sn",
            "a@3 b",
            "<bd sn> cp",
            "[bd sn, hh hh]",
            "bd(3,8,2)",
            "bd*2 sn/4",
        ] {
            let ast = parse_ast(src).unwrap();
            let printed = format!("{}", ast);
            let reparsed = parse_ast(&printed).unwrap();
            assert_eq!(ast, reparsed, "{} -> {}", src, printed);
        }
    }

    #[test]
    fn test_base_location_composition() {
        let err =
            parse_mini_notation_at("bd )", SourcePos::new(12, 8)).unwrap_err();
        assert_eq!(err.line, 12);
        assert_eq!(err.column, 11);
    }
}
