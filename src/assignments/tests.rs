use super::*;
use crate::db::testing::temp_store;
use crate::db::{
    insert_bus, insert_route, insert_user, insert_vehicle, NewBus, NewRoute, NewUser,
    NewVehicle, Role, UserStatus, VehicleKind,
};
use tempfile::TempDir;

const MGR: Actor<'static> = Actor {
    username: "admin",
    ip: "127.0.0.1",
};

async fn seeded() -> (AssignmentEngine, Store, TempDir) {
    let (store, dir) = temp_store().await;
    let pool = store.pool();
    let now = db::now_timestamp();

    for (username, role, status) in [
        ("admin", Role::Manager, UserStatus::Active),
        ("bjmathis", Role::Driver, UserStatus::Active),
        ("bsmith", Role::Driver, UserStatus::Active),
        ("driver9", Role::Driver, UserStatus::Pending),
        ("jdoe", Role::Driver, UserStatus::Suspended),
    ] {
        insert_user(
            pool,
            &NewUser {
                username: username.to_string(),
                display_name: username.to_string(),
                email: String::new(),
                password_hash: "x".to_string(),
                role,
                status,
                has_cdl: true,
                cdl_expiry: None,
            },
            &now,
        )
        .await
        .unwrap();
    }

    for (bus_id, status) in [
        ("24", VehicleStatus::Active),
        ("30", VehicleStatus::Active),
        ("99", VehicleStatus::Maintenance),
    ] {
        insert_bus(
            pool,
            &NewBus {
                bus_id: bus_id.to_string(),
                model: None,
                capacity: 48,
                status,
            },
            &now,
        )
        .await
        .unwrap();
    }

    insert_vehicle(
        pool,
        &NewVehicle {
            vehicle_id: "V-7".to_string(),
            vehicle_type: "van".to_string(),
            model: None,
            license: None,
            status: VehicleStatus::Active,
        },
        &now,
    )
    .await
    .unwrap();

    for route_id in ["NELC-1", "NELC-2", "NELC-3"] {
        insert_route(
            pool,
            &NewRoute {
                route_id: route_id.to_string(),
                route_name: format!("Northeast {}", route_id),
                period: Period::Am,
                start_time: "06:45".to_string(),
                end_time: "08:15".to_string(),
            },
            &now,
        )
        .await
        .unwrap();
    }

    (AssignmentEngine::new(store.clone()), store, dir)
}

fn request(driver: &str, bus: &str, route: &str, period: Period) -> AssignmentRequest {
    AssignmentRequest::new(driver, VehicleRef::bus(bus), route, period)
}

async fn row_count(store: &Store) -> i64 {
    db::count_assignments(store.pool()).await.unwrap()
}

#[tokio::test]
async fn test_driver_holds_multiple_routes() {
    let (engine, _store, _dir) = seeded().await;

    engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    engine
        .create(MGR, request("bjmathis", "24", "NELC-2", Period::Am))
        .await
        .unwrap();

    let rows = engine
        .list(&AssignmentFilter::for_driver("bjmathis"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let routes: Vec<&str> = rows.iter().map(|a| a.route_id.as_str()).collect();
    assert_eq!(routes, vec!["NELC-1", "NELC-2"]);
}

#[tokio::test]
async fn test_identical_create_is_duplicate() {
    let (engine, store, _dir) = seeded().await;
    let x = request("bjmathis", "24", "NELC-1", Period::Am);

    engine.create(MGR, x.clone()).await.unwrap();
    let err = engine.create(MGR, x).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateAssignment { .. }));
    assert_eq!(row_count(&store).await, 1);
}

#[tokio::test]
async fn test_same_route_same_period_conflicts() {
    let (engine, store, _dir) = seeded().await;
    engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();

    let err = engine
        .create(MGR, request("bjmathis", "30", "NELC-1", Period::Am))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DriverRouteConflict { .. }));
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    assert_eq!(row_count(&store).await, 1);

    // The other period is free.
    engine
        .create(MGR, request("bjmathis", "30", "NELC-1", Period::Pm))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_vehicle_double_booking_names_the_holder() {
    let (engine, store, _dir) = seeded().await;
    engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();

    let err = engine
        .create(MGR, request("bsmith", "24", "NELC-3", Period::Am))
        .await
        .unwrap_err();
    match &err {
        Error::VehicleDoubleBooked { holder, route_id, .. } => {
            assert_eq!(holder, "bjmathis");
            assert_eq!(route_id, "NELC-1");
        }
        other => panic!("expected VehicleDoubleBooked, got {:?}", other),
    }
    assert_eq!(
        err.user_message(),
        "Bus 24 is already assigned to NELC-1 for the AM period"
    );
    assert_eq!(row_count(&store).await, 1);

    // Same bus in the PM slot is fine.
    engine
        .create(MGR, request("bsmith", "24", "NELC-3", Period::Pm))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_references_must_exist_and_be_active() {
    let (engine, store, _dir) = seeded().await;

    let cases = [
        (request("nobody", "24", "NELC-1", Period::Am), "driver_missing"),
        (request("driver9", "24", "NELC-1", Period::Am), "driver_inactive"),
        (request("jdoe", "24", "NELC-1", Period::Am), "driver_inactive"),
        (request("admin", "24", "NELC-1", Period::Am), "driver_inactive"),
        (request("bjmathis", "77", "NELC-1", Period::Am), "vehicle_missing"),
        (request("bjmathis", "99", "NELC-1", Period::Am), "vehicle_inactive"),
        (request("bjmathis", "24", "NELC-9", Period::Am), "route_missing"),
    ];
    for (req, kind) in cases {
        let err = engine.create(MGR, req.clone()).await.unwrap_err();
        assert_eq!(err.kind(), kind, "request {:?}", req);
    }
    assert_eq!(row_count(&store).await, 0);
}

#[tokio::test]
async fn test_other_vehicle_kind() {
    let (engine, _store, _dir) = seeded().await;
    let van = VehicleRef::new(VehicleKind::Vehicle, "V-7");
    let created = engine
        .create(MGR, AssignmentRequest::new("bsmith", van.clone(), "NELC-2", Period::Pm))
        .await
        .unwrap();
    assert_eq!(created.vehicle, van);

    // A bus with the same id string is a different vehicle.
    let err = engine
        .create(MGR, AssignmentRequest::new(
            "bjmathis",
            VehicleRef::vehicle("24"),
            "NELC-1",
            Period::Am,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VehicleMissing(_)));
}

#[tokio::test]
async fn test_invalid_identifiers_rejected_before_storage() {
    let (engine, _store, _dir) = seeded().await;
    let err = engine
        .create(MGR, request("bjmathis", "24", "NELC-1'; --", Period::Am))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_update_rechecks_against_other_rows() {
    let (engine, store, _dir) = seeded().await;
    let first = engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    engine
        .create(MGR, request("bsmith", "30", "NELC-2", Period::Am))
        .await
        .unwrap();

    // Re-saving the same values is not a conflict with itself.
    let same = engine
        .update(MGR, first.id, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    assert_eq!(same.id, first.id);
    assert_eq!(same.created_at, first.created_at);

    // Moving onto bsmith's bus in the same period is rejected and the
    // original row survives the rollback.
    let err = engine
        .update(MGR, first.id, request("bjmathis", "30", "NELC-1", Period::Am))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VehicleDoubleBooked { .. }));
    let kept = engine.get(first.id).await.unwrap();
    assert_eq!(kept.vehicle, VehicleRef::bus("24"));
    assert_eq!(row_count(&store).await, 2);

    let moved = engine
        .update(MGR, first.id, request("bjmathis", "24", "NELC-3", Period::Pm))
        .await
        .unwrap();
    assert_eq!(moved.id, first.id);
    assert_eq!(moved.route_id, "NELC-3");
    assert_eq!(moved.period, Period::Pm);
}

#[tokio::test]
async fn test_update_and_delete_missing_row() {
    let (engine, _store, _dir) = seeded().await;
    assert!(matches!(
        engine
            .update(MGR, 404, request("bjmathis", "24", "NELC-1", Period::Am))
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(engine.delete(MGR, 404).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_delete_removes_row() {
    let (engine, store, _dir) = seeded().await;
    let created = engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    let deleted = engine.delete(MGR, created.id).await.unwrap();
    assert_eq!(deleted, created);
    assert_eq!(row_count(&store).await, 0);
    assert!(matches!(
        engine.delete(MGR, created.id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_filters() {
    let (engine, _store, _dir) = seeded().await;
    engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    engine
        .create(MGR, request("bjmathis", "24", "NELC-2", Period::Pm))
        .await
        .unwrap();
    engine
        .create(MGR, request("bsmith", "30", "NELC-1", Period::Pm))
        .await
        .unwrap();

    let all = engine.list(&AssignmentFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let on_route = engine
        .list(&AssignmentFilter {
            route_id: Some("NELC-1".into()),
            ..AssignmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(on_route.len(), 2);

    let pm_bus_24 = engine
        .list(&AssignmentFilter {
            period: Some(Period::Pm),
            vehicle: Some(VehicleRef::bus("24")),
            ..AssignmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(pm_bus_24.len(), 1);
    assert_eq!(pm_bus_24[0].route_id, "NELC-2");
}

#[tokio::test]
async fn test_concurrent_conflicting_creates_serialize() {
    let (engine, store, _dir) = seeded().await;
    let a = engine.clone();
    let b = engine.clone();

    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.create(MGR, request("bjmathis", "24", "NELC-1", Period::Am)).await }),
        tokio::spawn(async move { b.create(MGR, request("bsmith", "24", "NELC-2", Period::Am)).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, Error::VehicleDoubleBooked { .. }));
    assert_eq!(row_count(&store).await, 1);
}

#[test]
fn test_input_requires_exactly_one_vehicle() {
    let base = AssignmentInput {
        driver: " bjmathis ".into(),
        route_id: "NELC-1".into(),
        period: "am".into(),
        ..AssignmentInput::default()
    };

    let bus = AssignmentRequest::try_from(AssignmentInput {
        bus_id: Some("24".into()),
        vehicle_id: Some(String::new()),
        assigned_date: Some("2026-08-24".into()),
        ..base.clone()
    })
    .unwrap();
    assert_eq!(bus.driver, "bjmathis");
    assert_eq!(bus.vehicle, VehicleRef::bus("24"));
    assert_eq!(bus.period, Period::Am);
    assert_eq!(bus.assigned_date.to_string(), "2026-08-24");

    let van = AssignmentRequest::try_from(AssignmentInput {
        vehicle_id: Some("V-7".into()),
        ..base.clone()
    })
    .unwrap();
    assert_eq!(van.vehicle, VehicleRef::vehicle("V-7"));

    for input in [
        base.clone(),
        AssignmentInput {
            bus_id: Some("24".into()),
            vehicle_id: Some("V-7".into()),
            ..base.clone()
        },
        AssignmentInput {
            bus_id: Some("24".into()),
            period: "noon".into(),
            ..base.clone()
        },
        AssignmentInput {
            bus_id: Some("24".into()),
            assigned_date: Some("24/08/2026".into()),
            ..base
        },
    ] {
        assert!(matches!(
            AssignmentRequest::try_from(input),
            Err(Error::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn test_audit_records_assignment() {
    let (engine, store, _dir) = seeded().await;
    let actor = Actor {
        username: "admin",
        ip: "10.0.0.5",
    };
    let created = engine
        .create(actor, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    engine.delete(actor, created.id).await.unwrap();

    let logs = db::list_recent_audit_logs(store.pool(), 5).await.unwrap();
    assert_eq!(logs.len(), 2);
    let create = logs
        .iter()
        .find(|log| log.action == actions::ASSIGNMENT_CREATE)
        .unwrap();
    assert_eq!(create.actor.as_deref(), Some("admin"));
    assert_eq!(create.ip_address.as_deref(), Some("10.0.0.5"));
    assert_eq!(create.target_id.as_deref(), Some(created.id.to_string().as_str()));
    assert!(create.details.as_deref().unwrap_or("").contains("NELC-1"));
    assert!(logs.iter().any(|log| log.action == actions::ASSIGNMENT_DELETE));
}

#[tokio::test]
async fn test_failed_audit_rolls_back_the_change() {
    let (engine, store, _dir) = seeded().await;
    let created = engine
        .create(MGR, request("bjmathis", "24", "NELC-1", Period::Am))
        .await
        .unwrap();
    sqlx::query("DROP TABLE audit_logs")
        .execute(store.pool())
        .await
        .unwrap();

    assert!(engine
        .create(MGR, request("bsmith", "30", "NELC-2", Period::Pm))
        .await
        .is_err());
    assert_eq!(row_count(&store).await, 1);

    assert!(engine
        .update(MGR, created.id, request("bjmathis", "30", "NELC-1", Period::Am))
        .await
        .is_err());
    assert_eq!(engine.get(created.id).await.unwrap(), created);

    assert!(engine.delete(MGR, created.id).await.is_err());
    assert_eq!(row_count(&store).await, 1);
}
