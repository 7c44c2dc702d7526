/// A state machine whose transitions are pure functions of the current
/// state, an input event and a mutable context.
pub trait FiniteStateMachine {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;
}
