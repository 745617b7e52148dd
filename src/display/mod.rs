//! # Display Module
//!
//! LED backpack render primitives shared by the face matrix and the
//! bargraph, plus the controller that turns a face into render directives.
//!
//! ## Face Patterns
//!
//! Each face is an 8x8 grid written as eight comma-separated rows, one digit
//! per cell:
//!
//! | Digit | Colour |
//! |-------|--------|
//! | `0` | off |
//! | `1` | red |
//! | `2` | green |
//! | `3` | yellow |

use tracing::debug;

use crate::error::Result;
use crate::sink::{ActuatorMessage, MessageSink, SinkRef};

/// Side length of the face matrix.
pub const MATRIX_SIZE: usize = 8;

/// Colour of a bi-colour LED cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiColor {
    Off,
    Red,
    Green,
    Yellow,
}

impl BiColor {
    fn from_digit(digit: char) -> Self {
        match digit {
            '1' => BiColor::Red,
            '2' => BiColor::Green,
            '3' => BiColor::Yellow,
            _ => BiColor::Off,
        }
    }
}

/// One lit cell of a backpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackElement {
    pub x: u8,
    pub y: u8,
    pub color: BiColor,
}

impl PackElement {
    #[must_use]
    pub fn new(x: u8, y: u8, color: BiColor) -> Self {
        Self { x, y, color }
    }
}

/// Directive for an LED backpack driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderDirective {
    /// Switch every cell off
    Clear,
    /// Light the listed cells
    Display(Vec<PackElement>),
}

/// Expressions the face matrix can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceExpression {
    Neutral,
    Smile,
    Sad,
}

impl FaceExpression {
    fn pattern(self) -> &'static str {
        match self {
            FaceExpression::Smile => {
                "00333300,03000030,30300303,30000003,30300303,30033003,03000030,00333300"
            }
            FaceExpression::Neutral => {
                "00222200,02000020,20200202,20000002,20222202,20000002,02000020,00222200"
            }
            FaceExpression::Sad => {
                "00111100,01000010,10100101,10000001,10011001,10100101,01000010,00111100"
            }
        }
    }

    /// Lit cells of this face, row by row.
    #[must_use]
    pub fn elements(self) -> Vec<PackElement> {
        self.pattern()
            .split(',')
            .take(MATRIX_SIZE)
            .enumerate()
            .flat_map(|(y, row)| {
                row.chars()
                    .take(MATRIX_SIZE)
                    .enumerate()
                    .map(move |(x, digit)| PackElement::new(x as u8, y as u8, BiColor::from_digit(digit)))
            })
            .filter(|element| element.color != BiColor::Off)
            .collect()
    }
}

/// Renders faces onto an LED matrix driver.
///
/// Registered under the display target name; every [`ActuatorMessage::Face`]
/// becomes a `Clear` followed by a `Display` sent to the matrix sink.
pub struct LedMatrixController {
    matrix: SinkRef,
}

impl LedMatrixController {
    #[must_use]
    pub fn new(matrix: SinkRef) -> Self {
        Self { matrix }
    }
}

impl MessageSink for LedMatrixController {
    fn send(&self, message: ActuatorMessage) -> Result<()> {
        match message {
            ActuatorMessage::Face(face) => {
                self.matrix
                    .send(ActuatorMessage::Render(RenderDirective::Clear))?;
                self.matrix
                    .send(ActuatorMessage::Render(RenderDirective::Display(face.elements())))
            }
            other => {
                debug!(?other, "LED matrix ignores non-face message");
                Ok(())
            }
        }
    }
}
