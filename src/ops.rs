//! Operator classification shared by the scanning and replay passes.
//!
//! Both passes must agree exactly on which operators produce marks, otherwise
//! mark indices recorded during scanning would not line up during replay.

use crate::hash::gstate::Dependency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Save,
    Restore,
    Ctm,
    FillColor,
    StrokeColor,
    LineStyle,
    ExtGState,
    BeginText,
    EndText,
    TextState,
    TextFont,
    TextPosition,
    ShowText,
    PathConstruct,
    PathPaint,
    PathEnd,
    Clip,
    XObject,
    Shading,
    InlineImage,
    MarkedContent,
    Compat,
    Type3Glyph,
    PostScript,
    Other,
}

impl OpClass {
    /// True for operators that put something on the page.
    pub fn is_marking(self) -> bool {
        matches!(
            self,
            OpClass::ShowText
                | OpClass::PathPaint
                | OpClass::XObject
                | OpClass::Shading
                | OpClass::InlineImage
        )
    }

    pub fn dependency(self) -> Option<Dependency> {
        match self {
            OpClass::ShowText => Some(Dependency::Text),
            OpClass::PathPaint => Some(Dependency::Path),
            OpClass::XObject | OpClass::Shading | OpClass::InlineImage => Some(Dependency::Placed),
            _ => None,
        }
    }
}

pub fn classify(op: &str) -> OpClass {
    match op {
        "q" => OpClass::Save,
        "Q" => OpClass::Restore,
        "cm" => OpClass::Ctm,
        "g" | "rg" | "k" | "cs" | "sc" | "scn" => OpClass::FillColor,
        "G" | "RG" | "K" | "CS" | "SC" | "SCN" => OpClass::StrokeColor,
        "w" | "J" | "j" | "M" | "d" | "ri" | "i" => OpClass::LineStyle,
        "gs" => OpClass::ExtGState,
        "BT" => OpClass::BeginText,
        "ET" => OpClass::EndText,
        "Tc" | "Tw" | "Tz" | "TL" | "Tr" | "Ts" => OpClass::TextState,
        "Tf" => OpClass::TextFont,
        "Td" | "TD" | "Tm" | "T*" => OpClass::TextPosition,
        "Tj" | "TJ" | "'" | "\"" => OpClass::ShowText,
        "m" | "l" | "c" | "v" | "y" | "h" | "re" => OpClass::PathConstruct,
        "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => OpClass::PathPaint,
        "n" => OpClass::PathEnd,
        "W" | "W*" => OpClass::Clip,
        "Do" => OpClass::XObject,
        "sh" => OpClass::Shading,
        "EI" => OpClass::InlineImage,
        "BMC" | "BDC" | "EMC" | "MP" | "DP" => OpClass::MarkedContent,
        "BX" | "EX" => OpClass::Compat,
        "d0" | "d1" => OpClass::Type3Glyph,
        "PS" => OpClass::PostScript,
        _ => OpClass::Other,
    }
}
