use std::{fmt, io, num, error, result};

use crate::graph::{Degeneracy, NodeId};

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// An input file line did not have the expected shape.
    Parse(ParseError),
    /// A target node has no entry in the weight table.
    MissingWeight(NodeId),
    /// The monitoring requirements can not be met by any placement.
    DegenerateGraph(Vec<Degeneracy>),
    UnknownNode(NodeId),
    /// The solver ran out of time before any placement was found.
    TimedOut,
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(source) => source.fmt(f),
            Error::Parse(source) => write!(f, "malformed input: {source}"),
            Error::MissingWeight(node) => write!(f, "no weight given for target node {node}"),
            Error::DegenerateGraph(causes) => {
                write!(f, "no placement can monitor the graph")?;
                for (i, cause) in causes.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { ", " };
                    write!(f, "{sep}{cause}")?;
                }
                Ok(())
            },
            Error::UnknownNode(node) => write!(f, "node {node} is not part of the graph"),
            Error::TimedOut => write!(f, "solver timed out before finding any placement"),
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(source) => Some(source),
            Error::Parse(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        match err.kind {
            // Plain I/O failures are not a problem of the input format
            ParseErrorKind::Io(source) => Error::Io(source),
            _ => Error::Parse(err),
        }
    }
}

/// Type alias for `Result<T, monitorgame::Error>`
pub type Result<T> = result::Result<T, Error>;


/// Error while reading one of the line based input files.
#[derive(Debug)]
pub struct ParseError {
    /// 1-based line number, 0 if the error is not tied to a line.
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug)]
pub enum ParseErrorKind {
    Io(io::Error),
    MissingField,
    TrailingField,
    InvalidInt(num::ParseIntError),
    /// A node id above the configured number of nodes.
    NodeOutOfRange { node: NodeId, max: NodeId },
    Syntax(String),
}

impl ParseError {
    pub fn new(line: usize, kind: ParseErrorKind) -> Self {
        ParseError { line, kind }
    }

    /// Attach a line number to an error created without one.
    pub(crate) fn at(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: ", self.line)?;
        }
        match &self.kind {
            ParseErrorKind::Io(source) => source.fmt(f),
            ParseErrorKind::InvalidInt(source) => source.fmt(f),
            ParseErrorKind::MissingField => write!(f, "insufficient number of values in line"),
            ParseErrorKind::TrailingField => write!(f, "unexpected extra values in line"),
            ParseErrorKind::NodeOutOfRange { node, max } =>
                write!(f, "node {node} is out of range, the graph has {max} nodes"),
            ParseErrorKind::Syntax(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ParseErrorKind::Io(source) => Some(source),
            ParseErrorKind::InvalidInt(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        ParseError::new(0, ParseErrorKind::Io(e))
    }
}

impl From<num::ParseIntError> for ParseError {
    fn from(e: num::ParseIntError) -> Self {
        ParseError::new(0, ParseErrorKind::InvalidInt(e))
    }
}

impl From<ParseError> for io::Error {
    fn from(e: ParseError) -> io::Error {
        match e.kind {
            ParseErrorKind::Io(source) => source,
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
