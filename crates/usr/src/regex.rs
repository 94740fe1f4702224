//! Regex compiled to a three-valued judge.
//!
//! Supported dialect: literal bytes, `.`, `[...]` classes (ranges, `^`
//! negation), grouping `(...)`, alternation `|`, and the postfix repeats
//! `*`, `+`, `?`. Patterns are anchored at both ends — the whole key must
//! match, as a trie lookup has no notion of a partial hit.
//!
//! Compilation is a Thompson construction; by construction every NFA state
//! lies on a path to the accept state, which is what makes the `possible`
//! judgment below sound: any non-empty state set can still be completed
//! into a match by some suffix.

use crate::{Usr, UsrJudge};
use thiserror::Error;

/// Pattern compilation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unexpected end of pattern")]
    UnexpectedEnd,
    #[error("unbalanced parenthesis at byte {0}")]
    UnbalancedParen(usize),
    #[error("repeat operator `{0}` with nothing to repeat")]
    DanglingRepeat(char),
    #[error("bad character-class range")]
    BadClassRange,
    #[error("unclosed character class")]
    UnclosedClass,
}

/// Set of bytes, as a 256-bit bitmap.
#[derive(Clone, Copy, Debug, Default)]
struct ByteSet([u64; 4]);

impl ByteSet {
    fn insert(&mut self, b: u8) {
        self.0[(b >> 6) as usize] |= 1 << (b & 63);
    }

    fn insert_range(&mut self, lo: u8, hi: u8) {
        for b in lo..=hi {
            self.insert(b);
        }
    }

    fn negate(&mut self) {
        for w in &mut self.0 {
            *w = !*w;
        }
    }

    fn contains(&self, b: u8) -> bool {
        self.0[(b >> 6) as usize] & (1 << (b & 63)) != 0
    }

    fn intersects(&self, other: &ByteSet) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    fn any() -> Self {
        Self([u64::MAX; 4])
    }
}

enum Ast {
    Empty,
    Set(ByteSet),
    Concat(Vec<Ast>),
    Alt(Vec<Ast>),
    Star(Box<Ast>),
    Plus(Box<Ast>),
    Quest(Box<Ast>),
}

// ---------------------------------------------------------------- parser

struct Parser<'a> {
    pat: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(pattern: &'a str) -> Result<Ast, PatternError> {
        let mut p = Parser {
            pat: pattern.as_bytes(),
            pos: 0,
        };
        let ast = p.alternation()?;
        if p.pos != p.pat.len() {
            // the only way to stop early is an unmatched ')'
            return Err(PatternError::UnbalancedParen(p.pos));
        }
        Ok(ast)
    }

    fn peek(&self) -> Option<u8> {
        self.pat.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn alternation(&mut self) -> Result<Ast, PatternError> {
        let mut arms = vec![self.concat()?];
        while self.peek() == Some(b'|') {
            self.pos += 1;
            arms.push(self.concat()?);
        }
        Ok(if arms.len() == 1 {
            arms.pop().unwrap_or(Ast::Empty)
        } else {
            Ast::Alt(arms)
        })
    }

    fn concat(&mut self) -> Result<Ast, PatternError> {
        let mut parts = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'|' || b == b')' {
                break;
            }
            parts.push(self.repeat()?);
        }
        Ok(match parts.len() {
            0 => Ast::Empty,
            1 => parts.remove(0),
            _ => Ast::Concat(parts),
        })
    }

    fn repeat(&mut self) -> Result<Ast, PatternError> {
        let mut atom = self.atom()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => atom = Ast::Star(Box::new(atom)),
                b'+' => atom = Ast::Plus(Box::new(atom)),
                b'?' => atom = Ast::Quest(Box::new(atom)),
                _ => break,
            }
            self.pos += 1;
        }
        Ok(atom)
    }

    fn atom(&mut self) -> Result<Ast, PatternError> {
        match self.bump().ok_or(PatternError::UnexpectedEnd)? {
            b'(' => {
                let inner = self.alternation()?;
                if self.bump() != Some(b')') {
                    return Err(PatternError::UnbalancedParen(self.pos));
                }
                Ok(inner)
            }
            b'[' => self.class(),
            b'.' => Ok(Ast::Set(ByteSet::any())),
            b'*' | b'+' | b'?' => {
                let op = self.pat[self.pos - 1] as char;
                Err(PatternError::DanglingRepeat(op))
            }
            b'\\' => {
                let b = self.bump().ok_or(PatternError::UnexpectedEnd)?;
                Ok(Ast::Set(Self::literal(Self::unescape(b))))
            }
            b => Ok(Ast::Set(Self::literal(b))),
        }
    }

    fn class(&mut self) -> Result<Ast, PatternError> {
        let mut set = ByteSet::default();
        let negated = if self.peek() == Some(b'^') {
            self.pos += 1;
            true
        } else {
            false
        };
        loop {
            let b = match self.bump().ok_or(PatternError::UnclosedClass)? {
                b']' => break,
                b'\\' => Self::unescape(self.bump().ok_or(PatternError::UnclosedClass)?),
                b => b,
            };
            // "a-z" range, unless the '-' is the closing element
            if self.peek() == Some(b'-') && self.pat.get(self.pos + 1) != Some(&b']') {
                self.pos += 1;
                let hi = match self.bump().ok_or(PatternError::UnclosedClass)? {
                    b'\\' => Self::unescape(self.bump().ok_or(PatternError::UnclosedClass)?),
                    hi => hi,
                };
                if hi < b {
                    return Err(PatternError::BadClassRange);
                }
                set.insert_range(b, hi);
            } else {
                set.insert(b);
            }
        }
        if negated {
            set.negate();
        }
        Ok(Ast::Set(set))
    }

    fn literal(b: u8) -> ByteSet {
        let mut set = ByteSet::default();
        set.insert(b);
        set
    }

    fn unescape(b: u8) -> u8 {
        match b {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'0' => 0,
            other => other,
        }
    }
}

// ------------------------------------------------------------- NFA

/// One Thompson state: either a byte-set transition or epsilon edges.
struct State {
    trans: Option<(ByteSet, usize)>,
    eps: Vec<usize>,
}

struct Nfa {
    states: Vec<State>,
    start: usize,
    accept: usize,
}

impl Nfa {
    fn compile(ast: &Ast) -> Self {
        let mut nfa = Nfa {
            states: Vec::new(),
            start: 0,
            accept: 0,
        };
        let (start, accept) = nfa.build(ast);
        nfa.start = start;
        nfa.accept = accept;
        nfa
    }

    fn state(&mut self) -> usize {
        self.states.push(State {
            trans: None,
            eps: Vec::new(),
        });
        self.states.len() - 1
    }

    /// Builds a fragment for `ast`, returning `(entry, exit)`.
    fn build(&mut self, ast: &Ast) -> (usize, usize) {
        match ast {
            Ast::Empty => {
                let s = self.state();
                (s, s)
            }
            Ast::Set(set) => {
                let enter = self.state();
                let exit = self.state();
                self.states[enter].trans = Some((*set, exit));
                (enter, exit)
            }
            Ast::Concat(parts) => {
                let mut entry: Option<usize> = None;
                let mut tail: Option<usize> = None;
                for part in parts {
                    let (s, e) = self.build(part);
                    if let Some(prev_exit) = tail {
                        self.states[prev_exit].eps.push(s);
                    } else {
                        entry = Some(s);
                    }
                    tail = Some(e);
                }
                match (entry, tail) {
                    (Some(s), Some(e)) => (s, e),
                    _ => {
                        let s = self.state();
                        (s, s)
                    }
                }
            }
            Ast::Alt(arms) => {
                let enter = self.state();
                let exit = self.state();
                for arm in arms {
                    let (s, e) = self.build(arm);
                    self.states[enter].eps.push(s);
                    self.states[e].eps.push(exit);
                }
                (enter, exit)
            }
            Ast::Star(inner) => {
                let hub = self.state();
                let (s, e) = self.build(inner);
                self.states[hub].eps.push(s);
                self.states[e].eps.push(hub);
                (hub, hub)
            }
            Ast::Plus(inner) => {
                let (s, e) = self.build(inner);
                let exit = self.state();
                self.states[e].eps.push(exit);
                self.states[exit].eps.push(s);
                (s, exit)
            }
            Ast::Quest(inner) => {
                let (s, e) = self.build(inner);
                let exit = self.state();
                self.states[s].eps.push(exit);
                self.states[e].eps.push(exit);
                (s, exit)
            }
        }
    }

    fn closure(&self, live: &mut [bool]) {
        let mut work: Vec<usize> = live
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(i, _)| i)
            .collect();
        while let Some(s) = work.pop() {
            for &t in &self.states[s].eps {
                if !live[t] {
                    live[t] = true;
                    work.push(t);
                }
            }
        }
    }

    fn start_set(&self) -> Vec<bool> {
        let mut live = vec![false; self.states.len()];
        live[self.start] = true;
        self.closure(&mut live);
        live
    }

    /// Steps every live state on the bytes in `admitted`.
    fn step(&self, live: &[bool], admitted: &ByteSet) -> Vec<bool> {
        let mut next = vec![false; self.states.len()];
        for (s, &on) in live.iter().enumerate() {
            if !on {
                continue;
            }
            if let Some((set, to)) = &self.states[s].trans {
                if set.intersects(admitted) {
                    next[*to] = true;
                }
            }
        }
        self.closure(&mut next);
        next
    }
}

// ------------------------------------------------------------- judge

/// A [`UsrJudge`] backed by a compiled regex.
pub struct RegexJudge {
    nfa: Nfa,
}

impl RegexJudge {
    /// Compiles `pattern`; the whole key must match it.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let ast = Parser::parse(pattern)?;
        Ok(Self {
            nfa: Nfa::compile(&ast),
        })
    }

    /// Bytes consistent with the known bits of `usr` at position `i`.
    fn admitted(usr: &Usr, i: usize) -> ByteSet {
        let mut set = ByteSet::default();
        for b in 0..=255u8 {
            if usr.admits(i, b) {
                set.insert(b);
            }
        }
        set
    }
}

impl UsrJudge for RegexJudge {
    fn possible(&self, input: &Usr) -> bool {
        let mut live = self.nfa.start_set();
        for i in 0..input.len() {
            // the candidate key may end here: consistent iff every known bit
            // from this byte on reads as zero
            if live[self.nfa.accept] && input.tail_zero(i) {
                return true;
            }
            live = self.nfa.step(&live, &Self::admitted(input, i));
            if live.iter().all(|&on| !on) {
                return false;
            }
        }
        // states remain live, and the key may extend arbitrarily past the
        // view; every state reaches accept, so a completion exists
        true
    }

    fn matches(&self, input: &Usr) -> bool {
        let mut live = self.nfa.start_set();
        for &b in input.data() {
            let mut one = ByteSet::default();
            one.insert(b);
            live = self.nfa.step(&live, &one);
            if live.iter().all(|&on| !on) {
                return false;
            }
        }
        live[self.nfa.accept]
    }
}
