use crate::types::geometry::BBox;
use crate::types::operand::Operand;

/// What the interpreter should do with the operator it is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Execute,
    /// Do not paint. State effects (text advance, path consumption) still apply.
    Skip,
    /// Stop interpreting the rest of this pass.
    AbandonPass,
}

/// Kinds of nested content an operator can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Form,
    /// Tiling pattern cell, run for a pattern fill.
    Pattern,
    /// Type 3 glyph procedure. Runs as part of the text mark that shows it
    /// and records no marks of its own.
    Glyph,
}

/// Interface the interpreter drives while walking a page's content.
///
/// Named resources must reach the hooks as [`Operand::Resource`] so they
/// hash by content rather than by name.
pub trait OperatorHooks {
    type Error;

    fn before_operator(&mut self, op: &str, operands: &[Operand]) -> Result<Verdict, Self::Error>;

    /// `painted` is the device-space extent the operator produced, when the
    /// interpreter measured one.
    fn after_operator(&mut self, op: &str, painted: Option<BBox>) -> Result<(), Self::Error>;

    /// Nested content runs between `before_operator` and `after_operator`
    /// of the operator that invokes it, bracketed by these two calls.
    fn enter_content(&mut self, kind: ContentKind) -> Result<(), Self::Error>;

    fn exit_content(&mut self) -> Result<(), Self::Error>;
}
