//! Multi-touch session bookkeeping
//!
//! A session owns the contacts of one in-flight gesture. Each finger gets a
//! touch identity when it goes down and keeps it until it lifts; the event bus
//! uses that identity to correlate phases, so it must never change mid-contact.
//! Lifting bumps the finger's generation so the next contact on the same slot
//! cannot alias stale in-flight events.

use std::collections::BTreeMap;

use touch_protocol::{MAX_FINGERS, TouchPoint, check_finger};

use crate::{InjectorError, InjectorResult};

/// Identities below this are reserved by real digitizers
const IDENTITY_BASE: u32 = 2;

/// A finger currently in contact, with its session identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub point: TouchPoint,
    pub identity: u32,
}

impl Contact {
    /// Same contact with its position replaced, e.g. after a coordinate transform
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.point.x = x;
        self.point.y = y;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiTouchSession {
    contacts: BTreeMap<u8, Contact>,
    generations: [u32; MAX_FINGERS as usize],
}

impl MultiTouchSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity_for(&self, finger: u8) -> u32 {
        IDENTITY_BASE + self.generations[finger as usize] * MAX_FINGERS as u32 + finger as u32
    }

    /// Put a finger down. Fails if the finger is already in contact.
    pub fn down(&mut self, finger: u8, x: f64, y: f64) -> InjectorResult<Contact> {
        check_finger(finger)?;
        if self.contacts.contains_key(&finger) {
            return Err(InjectorError::ReuseBeforeLift { finger });
        }
        let contact = Contact {
            point: TouchPoint::new(finger, x, y),
            identity: self.identity_for(finger),
        };
        self.contacts.insert(finger, contact);
        Ok(contact)
    }

    /// Move a finger that is in contact
    pub fn move_to(&mut self, finger: u8, x: f64, y: f64) -> InjectorResult<Contact> {
        check_finger(finger)?;
        let contact = self
            .contacts
            .get_mut(&finger)
            .ok_or(InjectorError::FingerNotDown { finger })?;
        contact.point.x = x;
        contact.point.y = y;
        Ok(*contact)
    }

    /// Lift a finger, optionally at a final position. The returned contact
    /// still carries the identity it was down with.
    pub fn lift(&mut self, finger: u8, at: Option<(f64, f64)>) -> InjectorResult<Contact> {
        check_finger(finger)?;
        let mut contact = self
            .contacts
            .remove(&finger)
            .ok_or(InjectorError::FingerNotDown { finger })?;
        if let Some((x, y)) = at {
            contact.point.x = x;
            contact.point.y = y;
        }
        contact.point.valid = false;
        self.generations[finger as usize] = self.generations[finger as usize].wrapping_add(1);
        Ok(contact)
    }

    pub fn is_down(&self, finger: u8) -> bool {
        self.contacts.contains_key(&finger)
    }

    pub fn contact(&self, finger: u8) -> Option<&Contact> {
        self.contacts.get(&finger)
    }

    /// Contacts in finger order
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn active_fingers(&self) -> Vec<u8> {
        self.contacts.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn generation(&self, finger: u8) -> u32 {
        self.generations.get(finger as usize).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_stable_until_lift() {
        let mut session = MultiTouchSession::new();
        let down = session.down(2, 10.0, 10.0).unwrap();
        let moved = session.move_to(2, 20.0, 20.0).unwrap();
        let lifted = session.lift(2, None).unwrap();

        assert_eq!(down.identity, moved.identity);
        assert_eq!(down.identity, lifted.identity);
        assert_eq!(lifted.point.x, 20.0);
        assert!(!lifted.point.valid);
        assert!(session.is_empty());
    }

    #[test]
    fn test_down_twice_is_reuse_before_lift() {
        let mut session = MultiTouchSession::new();
        let first = session.down(2, 1.0, 1.0).unwrap();

        let err = session.down(2, 5.0, 5.0).unwrap_err();
        assert!(matches!(err, InjectorError::ReuseBeforeLift { finger: 2 }));
        // the original contact is untouched
        assert_eq!(session.contact(2).unwrap(), &first);
    }

    #[test]
    fn test_relift_gets_new_generation() {
        let mut session = MultiTouchSession::new();
        let first = session.down(1, 0.0, 0.0).unwrap();
        session.lift(1, None).unwrap();
        let second = session.down(1, 0.0, 0.0).unwrap();

        assert_ne!(first.identity, second.identity);
        assert_eq!(session.generation(1), 1);
    }

    #[test]
    fn test_identities_distinct_across_fingers() {
        let mut session = MultiTouchSession::new();
        let a = session.down(0, 0.0, 0.0).unwrap();
        let b = session.down(1, 0.0, 0.0).unwrap();
        assert_ne!(a.identity, b.identity);
        assert_eq!(session.active_fingers(), vec![0, 1]);
    }

    #[test]
    fn test_move_or_lift_without_down() {
        let mut session = MultiTouchSession::new();
        assert!(matches!(
            session.move_to(3, 0.0, 0.0),
            Err(InjectorError::FingerNotDown { finger: 3 })
        ));
        assert!(matches!(
            session.lift(3, None),
            Err(InjectorError::FingerNotDown { finger: 3 })
        ));
    }

    #[test]
    fn test_out_of_range_finger() {
        let mut session = MultiTouchSession::new();
        assert!(matches!(
            session.down(MAX_FINGERS, 0.0, 0.0),
            Err(InjectorError::Protocol(_))
        ));
    }
}
