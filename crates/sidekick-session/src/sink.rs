//! Output sink for classified text and session notices

/// Receives rendered output from the session.
///
/// The session stops any running progress indicator before calling into the
/// sink, so implementations may write to the terminal directly.
pub trait RenderSink: Send {
    /// Reasoning started; emit the opening delimiter
    fn reasoning_start(&mut self);

    /// A reasoning fragment as it arrives
    fn reasoning_delta(&mut self, delta: &str);

    /// Reasoning finished; emit the closing delimiter and the full reasoning text
    fn reasoning_end(&mut self, reasoning: &str);

    /// An answer fragment as it arrives
    fn answer_delta(&mut self, delta: &str);

    /// The response is complete
    fn response_end(&mut self);

    /// Informational message (retrieved context, autosave results)
    fn notice(&mut self, message: &str);

    /// User-visible error
    fn error(&mut self, message: &str);
}
