use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub route_id: Option<String>,
    pub guardian: String,
    pub phone_number: String,
    pub pickup_time: String,
    pub dropoff_time: String,
    pub position_number: i64,
    /// Early Childhood Special Education.
    pub is_ecse: bool,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub route_id: Option<String>,
    pub guardian: String,
    pub phone_number: String,
    pub pickup_time: String,
    pub dropoff_time: String,
    pub position_number: i64,
    pub is_ecse: bool,
}

/// Active students riding any of `route_ids`, in stop order.
pub async fn list_students_on_routes(
    db: impl SqliteExecutor<'_>,
    route_ids: &[String],
) -> Result<Vec<Student>, sqlx::Error> {
    if route_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM students WHERE active = 1 AND route_id IN (");
    let mut separated = query.separated(", ");
    for route_id in route_ids {
        separated.push_bind(route_id.clone());
    }
    separated.push_unseparated(")");
    query.push(" ORDER BY route_id, position_number, name");

    query.build_query_as::<Student>().fetch_all(db).await
}

pub async fn insert_student(
    db: impl SqliteExecutor<'_>,
    student: &NewStudent,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO students (student_id, name, route_id, guardian, phone_number, pickup_time,
                              dropoff_time, position_number, is_ecse, active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&student.student_id)
    .bind(&student.name)
    .bind(&student.route_id)
    .bind(&student.guardian)
    .bind(&student.phone_number)
    .bind(&student.pickup_time)
    .bind(&student.dropoff_time)
    .bind(student.position_number)
    .bind(student.is_ecse)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}
