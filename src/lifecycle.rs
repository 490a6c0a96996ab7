/// Lifecycle status of a queued command.
///
/// `not_now` is part of the protocol enumeration but never stored: a NotNow
/// reply re-queues (or expires) the command in the same transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Queued,
    Sent,
    Acknowledged,
    Error,
    NotNow,
    Expired,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::Sent => "sent",
            CommandStatus::Acknowledged => "acknowledged",
            CommandStatus::Error => "error",
            CommandStatus::NotNow => "not_now",
            CommandStatus::Expired => "expired",
            CommandStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(CommandStatus::Queued),
            "sent" => Some(CommandStatus::Sent),
            "acknowledged" => Some(CommandStatus::Acknowledged),
            "error" => Some(CommandStatus::Error),
            "not_now" => Some(CommandStatus::NotNow),
            "expired" => Some(CommandStatus::Expired),
            "cancelled" => Some(CommandStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal commands take no further transitions and are skipped by the
    /// queue selector.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Acknowledged
                | CommandStatus::Error
                | CommandStatus::Expired
                | CommandStatus::Cancelled
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported by a device for a delivered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Acknowledged,
    Error,
    NotNow,
}

impl ReplyOutcome {
    /// Parse the wire status of a device reply. `CommandFormatError` maps to
    /// `Error`: a malformed command cannot succeed on retry. Unknown strings
    /// are a protocol violation and yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Acknowledged" => Some(ReplyOutcome::Acknowledged),
            "Error" | "CommandFormatError" => Some(ReplyOutcome::Error),
            "NotNow" => Some(ReplyOutcome::NotNow),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ReplyOutcome::Acknowledged => "Acknowledged",
            ReplyOutcome::Error => "Error",
            ReplyOutcome::NotNow => "NotNow",
        }
    }
}

/// Result of applying a lifecycle transition: the status to store and the
/// remaining dispatch budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub status: CommandStatus,
    pub ttl: i32,
}

/// Transition for a `sent` command whose device replied.
///
/// A NotNow decrements the budget and either re-queues or expires in one
/// step, so a command can never sit in `queued` with nothing left to spend.
pub fn reply_disposition(outcome: ReplyOutcome, ttl: i32) -> Disposition {
    match outcome {
        ReplyOutcome::Acknowledged => Disposition {
            status: CommandStatus::Acknowledged,
            ttl,
        },
        ReplyOutcome::Error => Disposition {
            status: CommandStatus::Error,
            ttl,
        },
        ReplyOutcome::NotNow => requeue_disposition(ttl),
    }
}

/// Transition for a `sent` command that never got a reply within the policy
/// window. Same budget accounting as a NotNow.
pub fn timeout_disposition(ttl: i32) -> Disposition {
    requeue_disposition(ttl)
}

fn requeue_disposition(ttl: i32) -> Disposition {
    let remaining = (ttl - 1).max(0);
    if remaining == 0 {
        Disposition {
            status: CommandStatus::Expired,
            ttl: remaining,
        }
    } else {
        Disposition {
            status: CommandStatus::Queued,
            ttl: remaining,
        }
    }
}
