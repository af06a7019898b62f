use std::collections::VecDeque;
use std::fmt;

use crate::actor::SenderRef;
use crate::message::Payload;

/// One queued message together with the sender it came from.
pub struct Entry {
    pub msg: Payload,
    pub sender: SenderRef,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({:?} from {:?})", self.msg, self.sender)
    }
}

/// A FIFO message store with predicate-based extraction.
///
/// Extraction returns the oldest entry whose message satisfies the predicate
/// and splices it out; every other entry keeps its position. The mailbox
/// itself is not synchronized; all access goes through the owning actor's
/// monitor.
#[derive(Default)]
pub struct Mailbox {
    entries: VecDeque<Entry>,
}

impl Mailbox {
    pub fn new() -> Mailbox {
        Mailbox::default()
    }

    pub fn append(&mut self, msg: Payload, sender: SenderRef) {
        self.entries.push_back(Entry { msg, sender });
    }

    /// Removes and returns the oldest entry whose message matches `pred`.
    pub fn extract_first<P>(&mut self, pred: P) -> Option<Entry>
    where
        P: Fn(&Payload) -> bool,
    {
        self.extract_first_entry(|entry| pred(&entry.msg))
    }

    /// Like [`Mailbox::extract_first`] but the predicate sees the whole
    /// entry, sender included.
    pub fn extract_first_entry<P>(&mut self, pred: P) -> Option<Entry>
    where
        P: Fn(&Entry) -> bool,
    {
        let position = self.entries.iter().position(pred)?;
        self.entries.remove(position)
    }

    pub(crate) fn back_msg(&self) -> Option<&Payload> {
        self.entries.back().map(|entry| &entry.msg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(mailbox: &mut Mailbox, msg: impl std::any::Any + Send) {
        mailbox.append(Payload::new(msg), SenderRef::nobody());
    }

    #[test]
    fn extracts_oldest_match_first() {
        let mut mailbox = Mailbox::new();
        push(&mut mailbox, 1u32);
        push(&mut mailbox, 2u32);
        let entry = mailbox.extract_first(|msg| msg.is::<u32>()).unwrap();
        assert_eq!(entry.msg.downcast::<u32>().unwrap(), 1);
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn non_matching_entries_keep_their_order() {
        let mut mailbox = Mailbox::new();
        push(&mut mailbox, "first".to_string());
        push(&mut mailbox, 7u32);
        push(&mut mailbox, "second".to_string());

        // A younger match is extracted while older non-matches stay put.
        let entry = mailbox.extract_first(|msg| msg.is::<u32>()).unwrap();
        assert_eq!(entry.msg.downcast::<u32>().unwrap(), 7);

        let first = mailbox.extract_first(|msg| msg.is::<String>()).unwrap();
        assert_eq!(first.msg.downcast::<String>().unwrap(), "first");
        let second = mailbox.extract_first(|msg| msg.is::<String>()).unwrap();
        assert_eq!(second.msg.downcast::<String>().unwrap(), "second");
        assert!(mailbox.is_empty());
    }

    #[test]
    fn extract_returns_none_on_miss() {
        let mut mailbox = Mailbox::new();
        push(&mut mailbox, 1u8);
        assert!(mailbox.extract_first(|msg| msg.is::<String>()).is_none());
        assert_eq!(mailbox.len(), 1);
    }
}
