//! Session states and the command transition table.
//!
//! Legality of every (state, verb) pair is decided by [`gate`] alone, so the
//! whole table can be audited and tested exhaustively.

use crate::command::Verb;

/// Protocol state of one session.
///
/// ```text
/// Connected ─HELO/EHLO→ Greeted ─MAIL→ HaveSender ─RCPT→ HaveRecipient
///     ↑                    ↑                                  │
///     └──── STARTTLS ──────┤←──── body complete / RSET ──── ReceivingBody
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Before the first HELO/EHLO, and again after STARTTLS.
    #[default]
    Connected,
    /// Greeted, no transaction open.
    Greeted,
    /// MAIL accepted, no recipient accepted yet.
    HaveSender,
    /// At least one recipient accepted.
    HaveRecipient,
    /// Between BDAT chunks of an unfinished message.
    ReceivingBody,
    /// After QUIT or a fatal error. Terminal.
    Closed,
}

impl State {
    /// Every state, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Connected,
        Self::Greeted,
        Self::HaveSender,
        Self::HaveRecipient,
        Self::ReceivingBody,
        Self::Closed,
    ];

    /// Returns true if a mail transaction is open.
    #[must_use]
    pub const fn in_transaction(self) -> bool {
        matches!(
            self,
            Self::HaveSender | Self::HaveRecipient | Self::ReceivingBody
        )
    }

    /// Returns the state RSET returns to.
    #[must_use]
    pub const fn after_reset(self) -> Self {
        match self {
            Self::Connected => Self::Connected,
            Self::Closed => Self::Closed,
            _ => Self::Greeted,
        }
    }
}

/// Outcome of looking a command up in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The command may run.
    Allow,
    /// Valid command, wrong time. Answered with 503.
    BadSequence(&'static str),
    /// Known verb without an implementation. Answered with 502.
    NotImplemented,
    /// Unknown verb. Answered with 500.
    Unrecognized,
    /// The session is closed; nothing is answered.
    Closed,
}

/// Looks up whether `verb` may run in `state`.
#[must_use]
pub const fn gate(state: State, verb: Verb) -> Gate {
    if matches!(state, State::Closed) {
        return Gate::Closed;
    }

    match verb {
        Verb::Quit | Verb::Noop | Verb::Rset => Gate::Allow,
        Verb::Helo | Verb::Ehlo => match state {
            State::ReceivingBody => Gate::BadSequence("finish the BDAT transfer first"),
            _ => Gate::Allow,
        },
        Verb::Mail => match state {
            State::Greeted => Gate::Allow,
            State::Connected => Gate::BadSequence("send HELO/EHLO first"),
            _ => Gate::BadSequence("nested MAIL command"),
        },
        Verb::Rcpt => match state {
            State::HaveSender | State::HaveRecipient => Gate::Allow,
            State::Connected => Gate::BadSequence("send HELO/EHLO first"),
            State::ReceivingBody => Gate::BadSequence("finish the BDAT transfer first"),
            _ => Gate::BadSequence("need MAIL before RCPT"),
        },
        Verb::Data => match state {
            State::HaveRecipient => Gate::Allow,
            State::Connected => Gate::BadSequence("send HELO/EHLO first"),
            State::HaveSender => Gate::BadSequence("need RCPT before DATA"),
            State::ReceivingBody => Gate::BadSequence("DATA not allowed during BDAT transfer"),
            _ => Gate::BadSequence("need MAIL before DATA"),
        },
        Verb::Bdat => match state {
            State::HaveRecipient | State::ReceivingBody => Gate::Allow,
            State::Connected => Gate::BadSequence("send HELO/EHLO first"),
            State::HaveSender => Gate::BadSequence("need RCPT before BDAT"),
            _ => Gate::BadSequence("need MAIL before BDAT"),
        },
        Verb::StartTls => match state {
            State::Greeted => Gate::Allow,
            State::Connected => Gate::BadSequence("send EHLO first"),
            _ => Gate::BadSequence("STARTTLS not allowed during a transaction"),
        },
        Verb::Auth | Verb::Vrfy | Verb::Expn | Verb::Help | Verb::Turn | Verb::Etrn => {
            match state {
                State::Connected => Gate::BadSequence("send HELO/EHLO first"),
                _ => Gate::NotImplemented,
            }
        }
        Verb::Unknown => Gate::Unrecognized,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allowed(state: State) -> Vec<Verb> {
        Verb::ALL
            .into_iter()
            .filter(|verb| gate(state, *verb) == Gate::Allow)
            .collect()
    }

    #[test]
    fn test_connected_allows_only_session_commands() {
        assert_eq!(
            allowed(State::Connected),
            [Verb::Helo, Verb::Ehlo, Verb::Rset, Verb::Noop, Verb::Quit]
        );
    }

    #[test]
    fn test_greeted() {
        assert_eq!(
            allowed(State::Greeted),
            [
                Verb::Helo,
                Verb::Ehlo,
                Verb::Mail,
                Verb::Rset,
                Verb::Noop,
                Verb::Quit,
                Verb::StartTls
            ]
        );
    }

    #[test]
    fn test_have_sender() {
        assert_eq!(
            allowed(State::HaveSender),
            [Verb::Helo, Verb::Ehlo, Verb::Rcpt, Verb::Rset, Verb::Noop, Verb::Quit]
        );
    }

    #[test]
    fn test_have_recipient() {
        assert_eq!(
            allowed(State::HaveRecipient),
            [
                Verb::Helo,
                Verb::Ehlo,
                Verb::Rcpt,
                Verb::Data,
                Verb::Bdat,
                Verb::Rset,
                Verb::Noop,
                Verb::Quit
            ]
        );
    }

    #[test]
    fn test_receiving_body() {
        assert_eq!(
            allowed(State::ReceivingBody),
            [Verb::Bdat, Verb::Rset, Verb::Noop, Verb::Quit]
        );
    }

    #[test]
    fn test_closed_allows_nothing() {
        for verb in Verb::ALL {
            assert_eq!(gate(State::Closed, verb), Gate::Closed);
        }
    }

    #[test]
    fn test_unimplemented_verbs() {
        for verb in [Verb::Auth, Verb::Vrfy, Verb::Expn, Verb::Help, Verb::Turn, Verb::Etrn] {
            assert!(matches!(gate(State::Connected, verb), Gate::BadSequence(_)));
            assert_eq!(gate(State::Greeted, verb), Gate::NotImplemented);
            assert_eq!(gate(State::HaveRecipient, verb), Gate::NotImplemented);
        }
    }

    #[test]
    fn test_unknown_verb() {
        for state in State::ALL.into_iter().filter(|s| *s != State::Closed) {
            assert_eq!(gate(state, Verb::Unknown), Gate::Unrecognized);
        }
    }

    #[test]
    fn test_after_reset() {
        assert_eq!(State::Connected.after_reset(), State::Connected);
        assert_eq!(State::HaveRecipient.after_reset(), State::Greeted);
        assert_eq!(State::ReceivingBody.after_reset(), State::Greeted);
        assert_eq!(State::Greeted.after_reset().after_reset(), State::Greeted);
    }

    fn any_state() -> impl Strategy<Value = State> {
        prop::sample::select(State::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn transaction_verbs_only_in_legal_states(state in any_state()) {
            let mail = gate(state, Verb::Mail) == Gate::Allow;
            let rcpt = gate(state, Verb::Rcpt) == Gate::Allow;
            let data = gate(state, Verb::Data) == Gate::Allow;

            prop_assert_eq!(mail, state == State::Greeted);
            prop_assert_eq!(rcpt, matches!(state, State::HaveSender | State::HaveRecipient));
            prop_assert_eq!(data, state == State::HaveRecipient);
        }

        #[test]
        fn quit_always_allowed_until_closed(state in any_state()) {
            let expected = if state == State::Closed { Gate::Closed } else { Gate::Allow };
            prop_assert_eq!(gate(state, Verb::Quit), expected);
        }
    }
}
