use crate::limits::*;
use crate::model::*;

use super::availability::first_free_table;
use super::conflict::*;
use super::{Engine, EngineError};

impl Engine {
    /// Resolve an area preference to the areas to try, in order.
    ///
    /// Absent, blank or `ANY` (any case) means every area in storage order;
    /// anything else must name an existing area.
    pub(super) fn candidate_areas(&self, preference: Option<&str>) -> Result<Vec<Area>, EngineError> {
        let preference = preference
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(ANY_AREA));
        match preference {
            None => Ok(self.store.list_areas()),
            Some(p) => self
                .store
                .find_area(&p.to_lowercase())
                .map(|area| vec![area])
                .ok_or_else(|| EngineError::AreaNotFound(p.to_string())),
        }
    }

    /// Read-only probe for the first `(area, table)` free for the requested
    /// window. Nothing is held or reserved: a later confirm re-checks.
    pub async fn check_availability(&self, query: AvailabilityQuery) -> Result<TableAvailability, EngineError> {
        let party_size = parse_count("partySize", query.party_size.as_deref())?;
        let (date, start_time, party_size) = match (
            non_blank(query.date),
            non_blank(query.start_time),
            party_size,
        ) {
            (Some(date), Some(start_time), Some(party_size)) => (date, start_time, party_size),
            (date, start_time, party_size) => {
                return Err(missing_fields(&[
                    ("date", date.is_some()),
                    ("startTime", start_time.is_some()),
                    ("partySize", party_size.is_some()),
                ]));
            }
        };
        let date = parse_date(&date)?;
        let slot = Slot::new(parse_time(&start_time)?, validate_duration(query.duration)?);
        validate_party_size(party_size)?;

        let areas = self.candidate_areas(query.area_preference.as_deref())?;
        let booked = self.store.list_reservations(&ReservationFilter {
            date: Some(date),
            status: Some(ReservationStatus::Confirmed),
            ..Default::default()
        });

        for area in areas {
            let tables = self.store.list_tables(&TableFilter {
                area_id: Some(area.id.clone()),
                min_capacity: Some(party_size),
            });
            if let Some(table) = first_free_table(&tables, party_size, &slot, &booked, None) {
                return Ok(TableAvailability {
                    area_id: area.id,
                    area_name: area.name,
                    table: table.clone(),
                });
            }
        }
        Err(EngineError::NoSuitableTable { party_size })
    }

    pub fn list_areas(&self) -> Vec<Area> {
        self.store.list_areas()
    }

    pub fn list_tables(&self, filter: &TableFilter) -> Vec<Table> {
        self.store.list_tables(filter)
    }

    pub fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        self.store.list_reservations(filter)
    }

    pub fn get_reservation(&self, id: &str) -> Option<Reservation> {
        self.store.find_reservation(id)
    }
}
