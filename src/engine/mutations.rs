use tracing::debug;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ASSIGNMENTS_TOTAL, CONFLICTS_TOTAL};

use super::assign::{first_free_slot, occupied_slots};
use super::conflict::{check_no_conflict, collision, validate_booking, validate_request};
use super::{Engine, EngineError, WalCommand};

fn record_conflict(err: &EngineError) {
    if let EngineError::Conflict { dimension, .. } = err {
        metrics::counter!(CONFLICTS_TOTAL, "dimension" => dimension.as_str()).increment(1);
    }
}

impl Engine {
    /// Check `candidate` against every booking in its slot and append it if
    /// nothing collides.
    pub async fn check_and_insert(&self, mut candidate: NewBooking) -> Result<Booking, EngineError> {
        candidate.room = normalize_room(candidate.room);
        validate_booking(&candidate)?;

        let mut tt = self.state.write().await;
        if tt.len() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        check_no_conflict(&tt, &candidate, None, self.policy).inspect_err(|e| {
            record_conflict(e);
            debug!("rejected {} at {}: {e}", candidate.staff_name, candidate.slot);
        })?;

        let booking = candidate.with_id(tt.next_id);
        let event = Event::BookingAdded {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut tt, &event).await?;
        debug!("booked {} for {} at {}", booking.id, booking.staff_name, booking.slot);
        Ok(booking)
    }

    /// Insert several bookings atomically. All-or-nothing: candidates are
    /// checked against the table and against each other before any is
    /// committed.
    pub async fn batch_check_and_insert(
        &self,
        candidates: Vec<NewBooking>,
    ) -> Result<Vec<Booking>, EngineError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if candidates.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let candidates: Vec<NewBooking> = candidates
            .into_iter()
            .map(|mut c| {
                c.room = normalize_room(c.room);
                c
            })
            .collect();
        for c in &candidates {
            validate_booking(c)?;
        }

        let mut tt = self.state.write().await;
        if tt.len() + candidates.len() > MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        // Phase 1: validate against current state and earlier rows of the batch.
        let mut accepted: Vec<Booking> = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.into_iter().enumerate() {
            check_no_conflict(&tt, &candidate, None, self.policy).inspect_err(record_conflict)?;
            for earlier in &accepted {
                if let Some(dimension) = collision(self.policy, earlier, &candidate) {
                    let err = EngineError::Conflict {
                        existing: earlier.id,
                        dimension,
                    };
                    record_conflict(&err);
                    return Err(err);
                }
            }
            accepted.push(candidate.with_id(tt.next_id + i as BookingId));
        }

        // Phase 2: all validated, commit as one WAL unit.
        let events = accepted
            .iter()
            .map(|booking| Event::BookingAdded {
                booking: booking.clone(),
            })
            .collect();
        self.persist_and_apply_all(&mut tt, events).await?;
        debug!("batch booked {} entries", accepted.len());
        Ok(accepted)
    }

    /// Book the first slot in scan order that `request`'s staff+department
    /// pair has not already used.
    ///
    /// Only the pair's own bookings are consulted; the room and class checks
    /// of [`Engine::check_and_insert`] are not applied.
    pub async fn auto_assign(&self, request: AssignRequest) -> Result<Booking, EngineError> {
        validate_request(&request)?;

        let mut tt = self.state.write().await;
        if tt.len() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        let occupied = occupied_slots(&tt, &request.staff_name, &request.department);
        let Some(slot) = first_free_slot(&occupied) else {
            metrics::counter!(ASSIGNMENTS_TOTAL, "outcome" => "no_capacity").increment(1);
            debug!(
                "no capacity for {} in {}",
                request.staff_name, request.department
            );
            return Err(EngineError::NoCapacity {
                staff_name: request.staff_name,
                department: request.department,
            });
        };

        let booking = request.at(slot).with_id(tt.next_id);
        let event = Event::BookingAdded {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut tt, &event).await?;
        metrics::counter!(ASSIGNMENTS_TOTAL, "outcome" => "assigned").increment(1);
        debug!(
            "auto-assigned {} to {} ({}) at {}",
            booking.subject, booking.staff_name, booking.department, booking.slot
        );
        Ok(booking)
    }

    /// Apply `changes` to an existing booking, re-checking conflicts against
    /// every other booking.
    pub async fn edit_booking(
        &self,
        id: BookingId,
        changes: BookingChanges,
    ) -> Result<Booking, EngineError> {
        let mut tt = self.state.write().await;
        let current = tt.get(id).ok_or(EngineError::NotFound(id))?;
        let edited = changes.apply(current);
        if edited == *current {
            return Ok(edited);
        }

        let candidate = NewBooking::from(&edited);
        validate_booking(&candidate)?;
        check_no_conflict(&tt, &candidate, Some(id), self.policy).inspect_err(record_conflict)?;

        let event = Event::BookingEdited {
            booking: edited.clone(),
        };
        self.persist_and_apply(&mut tt, &event).await?;
        debug!("edited booking {id}");
        Ok(edited)
    }

    pub async fn delete_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let mut tt = self.state.write().await;
        let removed = tt.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::BookingRemoved { id };
        self.persist_and_apply(&mut tt, &event).await?;
        debug!("deleted booking {id}");
        Ok(removed)
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// table. Holds the read lock until the swap completes so no append can
    /// slip in between snapshot and rewrite.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let tt = self.state.read().await;
        let mut events = Vec::with_capacity(tt.len() + 1);
        events.push(Event::IdReserved {
            next_id: tt.next_id,
        });
        events.extend(tt.iter().map(|b| Event::BookingAdded { booking: b.clone() }));

        let result = self
            .wal_request(|response| WalCommand::Compact { events, response })
            .await?;
        drop(tt);
        result.map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}
