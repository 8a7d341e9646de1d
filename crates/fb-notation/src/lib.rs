//! Move notation for the first-block solver.
//!
//! The accepted alphabet is the one the solver understands: face turns
//! `U D F B R L`, the `M` slice and the `x`/`y` rotations, each optionally
//! followed by `'` (inverse) or `2` (half turn). Moves may be separated by
//! whitespace or written back to back.
//!
//! The host uses [`parse_moves`] to reject malformed requests before they
//! reach the sandbox; the guest uses it to read the scramble it solves.

#![warn(missing_docs)]

use std::fmt;

use nom::{
    character::complete::{multispace0, one_of},
    combinator::{map, map_opt, opt},
    multi::many0,
    sequence::{pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

/// Letters that start a move.
const LETTERS: &str = "UDFBRLMxy";
/// Outer face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Face {
    U,
    D,
    F,
    B,
    R,
    L,
}

/// Inner slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Slice {
    M,
}

/// Whole-cube rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Rotation {
    X,
    Y,
}

/// A single move with its amount in quarter turns (1, 2 or 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Move {
    Face(Face, u8),
    Slice(Slice, u8),
    Rotation(Rotation, u8),
}

impl Move {
    /// Quarter turns, 1..=3.
    pub fn amount(self) -> u8 {
        match self {
            Move::Face(_, n) | Move::Slice(_, n) | Move::Rotation(_, n) => n,
        }
    }

    /// The same move with a different amount.
    pub fn with_amount(self, amount: u8) -> Self {
        match self {
            Move::Face(f, _) => Move::Face(f, amount),
            Move::Slice(s, _) => Move::Slice(s, amount),
            Move::Rotation(r, _) => Move::Rotation(r, amount),
        }
    }

    /// The move that undoes this one.
    pub fn inverse(self) -> Self {
        self.with_amount(4 - self.amount())
    }

    fn from_letter(letter: char) -> Option<Self> {
        let mv = match letter {
            'U' => Move::Face(Face::U, 1),
            'D' => Move::Face(Face::D, 1),
            'F' => Move::Face(Face::F, 1),
            'B' => Move::Face(Face::B, 1),
            'R' => Move::Face(Face::R, 1),
            'L' => Move::Face(Face::L, 1),
            'M' => Move::Slice(Slice::M, 1),
            'x' => Move::Rotation(Rotation::X, 1),
            'y' => Move::Rotation(Rotation::Y, 1),
            _ => return None,
        };
        Some(mv)
    }

    fn letter(self) -> char {
        match self {
            Move::Face(Face::U, _) => 'U',
            Move::Face(Face::D, _) => 'D',
            Move::Face(Face::F, _) => 'F',
            Move::Face(Face::B, _) => 'B',
            Move::Face(Face::R, _) => 'R',
            Move::Face(Face::L, _) => 'L',
            Move::Slice(Slice::M, _) => 'M',
            Move::Rotation(Rotation::X, _) => 'x',
            Move::Rotation(Rotation::Y, _) => 'y',
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())?;
        match self.amount() {
            2 => write!(f, "2"),
            3 => write!(f, "'"),
            _ => Ok(()),
        }
    }
}

/// Scramble text that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected {found:?} at position {position}")]
pub struct ScrambleError {
    /// Byte offset of the offending character
    pub position: usize,
    /// The offending character
    pub found: char,
    input: String,
}

impl ScrambleError {
    /// The input with a caret under the offending character.
    pub fn caret(&self) -> String {
        let column = self.input[..self.position].chars().count();
        format!(
            "{}\n{}^ parse error at position {}",
            self.input,
            " ".repeat(column),
            self.position
        )
    }
}

fn letter(input: &str) -> IResult<&str, Move> {
    map_opt(one_of(LETTERS), Move::from_letter)(input)
}

fn amount(input: &str) -> IResult<&str, u8> {
    map(opt(one_of("'2")), |suffix| match suffix {
        Some('\'') => 3,
        Some(_) => 2,
        None => 1,
    })(input)
}

fn single_move(input: &str) -> IResult<&str, Move> {
    map(pair(letter, amount), |(mv, n)| mv.with_amount(n))(input)
}

fn moves(input: &str) -> IResult<&str, Vec<Move>> {
    terminated(many0(preceded(multispace0, single_move)), multispace0)(input)
}

/// Parse a whitespace-separated (or adjacent) move sequence.
///
/// Fails at the first character that cannot continue the sequence.
pub fn parse_moves(input: &str) -> Result<Vec<Move>, ScrambleError> {
    let (rest, parsed) = match moves(input) {
        Ok(done) => done,
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => (e.input, Vec::new()),
        Err(nom::Err::Incomplete(_)) => (input, Vec::new()),
    };

    match rest.chars().next() {
        None => Ok(parsed),
        Some(found) => Err(ScrambleError {
            position: input.len() - rest.len(),
            found,
            input: input.to_string(),
        }),
    }
}

/// The sequence that undoes `moves`.
pub fn invert(moves: &[Move]) -> Vec<Move> {
    moves.iter().rev().map(|mv| mv.inverse()).collect()
}
