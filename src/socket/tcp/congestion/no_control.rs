use super::Controller;

/// No congestion window: the sender is limited by the peer's window alone.
#[derive(Debug)]
pub struct NoControl;

impl Controller for NoControl {
    fn window(&self) -> usize {
        usize::MAX
    }
}
