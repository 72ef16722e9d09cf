/// Gate for destructive actions.
pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers every question the same way, e.g. for `--yes`.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}
