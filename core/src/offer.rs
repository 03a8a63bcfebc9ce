use std::fmt::Debug;

use log::warn;

use crate::action::{Action, Actions};

pub const TEXT_MIME: &str = "text/plain;charset=utf-8";
pub const UTF8_STRING_MIME: &str = "UTF8_STRING";
/// MIME types declared for local sources. Only [`TEXT_MIME`] is ever read
/// back.
pub const OFFERED_MIMES: [&str; 2] = [TEXT_MIME, UTF8_STRING_MIME];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OfferRole {
    Selection,
    Drag,
}

/// Data offered to us by another client (or ourselves), identified by the
/// protocol handle `O`.
#[derive(Debug)]
pub struct DataOffer<O> {
    handle: O,
    mimes: Vec<String>,
    source_actions: Actions,
    action: Action,
    role: Option<OfferRole>,
}

impl<O> DataOffer<O> {
    #[must_use]
    pub const fn new(handle: O) -> Self {
        Self {
            handle,
            mimes: Vec::new(),
            source_actions: Actions::empty(),
            action: Action::None,
            role: None,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> &O {
        &self.handle
    }

    pub fn add_mime(&mut self, mime: String) {
        if !self.mimes.contains(&mime) {
            self.mimes.push(mime);
        }
    }

    #[must_use]
    pub fn mimes(&self) -> &[String] {
        &self.mimes
    }

    /// The MIME type we would read from this offer, if it has one.
    #[must_use]
    pub fn text_mime(&self) -> Option<&'static str> {
        self.mimes
            .iter()
            .any(|mime| mime == TEXT_MIME)
            .then_some(TEXT_MIME)
    }

    pub fn set_source_actions(&mut self, actions: Actions) {
        self.source_actions = actions;
    }

    #[must_use]
    pub const fn source_actions(&self) -> Actions {
        self.source_actions
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub const fn role(&self) -> Option<OfferRole> {
        self.role
    }

    fn adopt(mut self, role: OfferRole) -> Self {
        self.role = Some(role);
        self
    }
}

pub const ANNOUNCED_OFFERS: usize = 4;

/// Offers that were announced but not yet tied to the selection or a drag.
#[derive(Debug)]
pub struct AnnouncedOffers<O> {
    offers: [Option<DataOffer<O>>; ANNOUNCED_OFFERS],
    /// Announcement order of each slot, compared to find the oldest offer.
    announced_at: [u64; ANNOUNCED_OFFERS],
    next: u64,
}

impl<O> Default for AnnouncedOffers<O> {
    fn default() -> Self {
        Self {
            offers: [const { None }; ANNOUNCED_OFFERS],
            announced_at: [0; ANNOUNCED_OFFERS],
            next: 0,
        }
    }
}

impl<O: PartialEq + Debug> AnnouncedOffers<O> {
    /// Tracks a newly announced offer, returning the oldest unadopted offer
    /// if it had to be evicted to make room.
    pub fn announce(&mut self, handle: O) -> Option<DataOffer<O>> {
        let Self {
            offers,
            announced_at,
            next,
        } = self;

        let idx = offers.iter().position(Option::is_none).unwrap_or_else(|| {
            (0..ANNOUNCED_OFFERS)
                .min_by_key(|&i| announced_at[i])
                .unwrap_or_default()
        });
        announced_at[idx] = *next;
        *next += 1;

        let evicted = offers[idx].replace(DataOffer::new(handle));
        if let Some(old) = &evicted {
            warn!("Dropping unclaimed offer {:?}.", old.handle);
        }
        evicted
    }

    pub fn get_mut(&mut self, handle: &O) -> Option<&mut DataOffer<O>> {
        self.iter_mut().find(|offer| offer.handle == *handle)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DataOffer<O>> {
        self.offers.iter_mut().flatten()
    }

    /// Claims an announced offer for `role`. Offers that were never announced
    /// are adopted with no known MIME types.
    pub fn adopt(&mut self, handle: O, role: OfferRole) -> DataOffer<O> {
        let announced = self
            .offers
            .iter_mut()
            .find(|offer| offer.as_ref().is_some_and(|offer| offer.handle == handle))
            .and_then(Option::take);
        if announced.is_none() {
            warn!("Adopting offer {handle:?} that was never announced.");
        }
        announced.unwrap_or_else(|| DataOffer::new(handle)).adopt(role)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DataOffer<O>> + '_ {
        self.offers.iter_mut().filter_map(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_mime_requires_exact_match() {
        let mut offer = DataOffer::new(1);
        offer.add_mime(UTF8_STRING_MIME.to_string());
        assert_eq!(offer.text_mime(), None);

        offer.add_mime(TEXT_MIME.to_string());
        offer.add_mime(TEXT_MIME.to_string());
        assert_eq!(offer.text_mime(), Some(TEXT_MIME));
        assert_eq!(offer.mimes().len(), 2);
    }

    #[test]
    fn adopt_moves_out_of_ring() {
        let mut offers = AnnouncedOffers::default();
        assert!(offers.announce(1).is_none());
        assert!(offers.announce(2).is_none());
        offers.get_mut(&2).unwrap().add_mime(TEXT_MIME.to_string());

        let offer = offers.adopt(2, OfferRole::Selection);
        assert_eq!(offer.role(), Some(OfferRole::Selection));
        assert_eq!(offer.text_mime(), Some(TEXT_MIME));
        assert!(offers.get_mut(&2).is_none());
        assert!(offers.get_mut(&1).is_some());
    }

    #[test]
    fn unknown_offers_are_adopted_empty() {
        let mut offers = AnnouncedOffers::default();
        let offer = offers.adopt(9, OfferRole::Drag);
        assert_eq!(*offer.handle(), 9);
        assert!(offer.mimes().is_empty());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut offers = AnnouncedOffers::default();
        for i in 0..ANNOUNCED_OFFERS {
            assert!(offers.announce(i).is_none());
        }
        let evicted = offers.announce(ANNOUNCED_OFFERS).unwrap();
        assert_eq!(*evicted.handle(), 0);
        assert_eq!(offers.drain().count(), ANNOUNCED_OFFERS);
        assert_eq!(offers.drain().count(), 0);
    }

    #[test]
    fn overflow_after_adoption_evicts_oldest_unclaimed() {
        let mut offers = AnnouncedOffers::default();
        for i in 1..=4 {
            assert!(offers.announce(i).is_none());
        }
        offers.adopt(3, OfferRole::Selection);
        assert!(offers.announce(5).is_none());

        assert_eq!(offers.announce(6).map(|o| *o.handle()), Some(1));
        assert_eq!(offers.announce(7).map(|o| *o.handle()), Some(2));
        assert_eq!(offers.announce(8).map(|o| *o.handle()), Some(4));
        assert_eq!(offers.announce(9).map(|o| *o.handle()), Some(5));
        assert!(offers.get_mut(&6).is_some());
    }
}
