mod submission;
mod ticket;

pub(crate) use submission::Submission;
#[cfg(test)]
pub(crate) use ticket::Ticket;
