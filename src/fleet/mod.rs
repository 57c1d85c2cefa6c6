//! Buses, other vehicles, routes and students.

use tracing::{info, warn};

use crate::db::{
    self, audit::actions, audit::target_types, delete_for_vehicle, insert_bus, insert_route,
    insert_student, insert_vehicle, list_buses, list_routes, list_students_on_routes,
    list_vehicles, set_vehicle_status, Bus, NewBus, NewRoute, NewStudent,
    NewVehicle, OtherVehicle, Route, Store, Student, VehicleRef, VehicleStatus, VEHICLE_TYPES,
};
use crate::error::{Error, Result};
use crate::users::Actor;
use crate::validation;

#[derive(Clone)]
pub struct Fleet {
    store: Store,
}

impl Fleet {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn buses(&self) -> Result<Vec<Bus>> {
        self.store.deadline(list_buses(self.store.pool())).await
    }

    pub async fn vehicles(&self) -> Result<Vec<OtherVehicle>> {
        self.store.deadline(list_vehicles(self.store.pool())).await
    }

    pub async fn routes(&self) -> Result<Vec<Route>> {
        self.store.deadline(list_routes(self.store.pool())).await
    }

    /// Active students riding the given routes.
    pub async fn students_on(&self, route_ids: &[String]) -> Result<Vec<Student>> {
        self.store
            .deadline(list_students_on_routes(self.store.pool(), route_ids))
            .await
    }

    /// Taking a vehicle out of service leaves its existing assignments in
    /// place; only new assignments are refused.
    pub async fn set_status(
        &self,
        actor: Actor<'_>,
        vehicle: &VehicleRef,
        status: VehicleStatus,
    ) -> Result<()> {
        let target = vehicle.clone();
        let audit = actor
            .audit(actions::VEHICLE_STATUS, target_types::VEHICLE, &vehicle.to_string())
            .with_details(serde_json::json!({ "status": status.as_str() }));
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    if !set_vehicle_status(&mut *conn, &target, status, &db::now_timestamp())
                        .await?
                    {
                        return Err(Error::NotFound(target.to_string()));
                    }
                    audit.write(&mut *conn).await?;
                    Ok(())
                })
            })
            .await?;
        info!(vehicle = %vehicle, status = %status, by = %actor.username, "Vehicle status changed");
        Ok(())
    }

    /// Delete a vehicle and every assignment that uses it.
    pub async fn delete_vehicle(&self, actor: Actor<'_>, vehicle: &VehicleRef) -> Result<u64> {
        let target = vehicle.clone();
        let audit = actor.audit(actions::VEHICLE_DELETE, target_types::VEHICLE, &vehicle.to_string());
        let removed = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let removed = delete_for_vehicle(&mut *conn, &target).await?;
                    if !db::delete_vehicle(&mut *conn, &target).await? {
                        return Err(Error::NotFound(target.to_string()));
                    }
                    audit
                        .with_details(serde_json::json!({ "assignments_removed": removed }))
                        .write(&mut *conn)
                        .await?;
                    Ok(removed)
                })
            })
            .await?;
        warn!(vehicle = %vehicle, by = %actor.username, assignments_removed = removed, "Vehicle deleted");
        Ok(removed)
    }

    pub async fn add_bus(&self, bus: NewBus) -> Result<()> {
        validation::validate_identifier("Bus", &bus.bus_id)?;
        if bus.capacity < 0 {
            return Err(Error::invalid("capacity cannot be negative"));
        }
        let now = db::now_timestamp();
        self.store
            .deadline(insert_bus(self.store.pool(), &bus, &now))
            .await
    }

    pub async fn add_vehicle(&self, vehicle: NewVehicle) -> Result<()> {
        validation::validate_identifier("Vehicle", &vehicle.vehicle_id)?;
        if !VEHICLE_TYPES.contains(&vehicle.vehicle_type.as_str()) {
            return Err(Error::invalid(format!(
                "vehicle type must be one of: {}",
                VEHICLE_TYPES.join(", ")
            )));
        }
        let now = db::now_timestamp();
        self.store
            .deadline(insert_vehicle(self.store.pool(), &vehicle, &now))
            .await
    }

    pub async fn add_route(&self, route: NewRoute) -> Result<()> {
        validation::validate_identifier("Route", &route.route_id)?;
        if route.route_name.trim().is_empty() {
            return Err(Error::invalid("route name is required"));
        }
        let now = db::now_timestamp();
        self.store
            .deadline(insert_route(self.store.pool(), &route, &now))
            .await
    }

    pub async fn add_student(&self, student: NewStudent) -> Result<()> {
        validation::validate_identifier("Student", &student.student_id)?;
        if student.name.trim().is_empty() {
            return Err(Error::invalid("student name is required"));
        }
        let now = db::now_timestamp();
        self.store
            .deadline(insert_student(self.store.pool(), &student, &now))
            .await
    }
}
