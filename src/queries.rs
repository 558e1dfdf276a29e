//! Lookups behind the stop/route search, route stop list and route list.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::analytics::ANALYZED_DIRECTION;
use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopMatch {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RouteSummary {
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct SearchResults {
    pub stops: Vec<StopMatch>,
    pub routes: Vec<RouteSummary>,
}

/// A stop along a route, in the shape the map view consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStop {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct StopRow {
    stop_id: String,
    stop_name: Option<String>,
    stop_lat: Option<String>,
    stop_lon: Option<String>,
}

fn coordinate(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl From<StopRow> for StopMatch {
    fn from(row: StopRow) -> Self {
        Self {
            stop_lat: coordinate(row.stop_lat.as_deref()),
            stop_lon: coordinate(row.stop_lon.as_deref()),
            stop_id: row.stop_id,
            stop_name: row.stop_name,
        }
    }
}

impl From<StopRow> for RouteStop {
    fn from(row: StopRow) -> Self {
        Self {
            lat: coordinate(row.stop_lat.as_deref()),
            lng: coordinate(row.stop_lon.as_deref()),
            stop_id: row.stop_id,
            stop_name: row.stop_name,
        }
    }
}

/// Builds a `LIKE` pattern matching `needle` literally anywhere in a value.
/// Case folding is left to SQLite so both sides of the match fold alike.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Case-insensitive substring search over stop names and route short names.
#[tracing::instrument(skip(pool))]
pub async fn search(pool: &SqlitePool, query: &str) -> Result<SearchResults, QueryError> {
    let pattern = contains_pattern(query);

    let stops: Vec<StopRow> = sqlx::query_as(
        "SELECT stop_id, stop_name, CAST(stop_lat AS TEXT) AS stop_lat, CAST(stop_lon AS TEXT) AS stop_lon \
         FROM stops WHERE stop_name LIKE ? ESCAPE '\\' ORDER BY stop_name, stop_id",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    let routes: Vec<RouteSummary> = sqlx::query_as(
        "SELECT route_id, route_short_name, route_long_name \
         FROM routes WHERE route_short_name LIKE ? ESCAPE '\\' ORDER BY route_id",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    Ok(SearchResults {
        stops: stops.into_iter().map(StopMatch::from).collect(),
        routes,
    })
}

/// Stops served by the first analyzed-direction trip of a route, in stop order.
#[tracing::instrument(skip(pool))]
pub async fn stops_for_route(pool: &SqlitePool, route_id: &str) -> Result<Vec<RouteStop>, QueryError> {
    let first_trip: Option<String> = sqlx::query_scalar(
        "SELECT trip_id FROM trips WHERE route_id = ? AND direction_id = ? ORDER BY trip_id LIMIT 1",
    )
    .bind(route_id)
    .bind(ANALYZED_DIRECTION)
    .fetch_optional(pool)
    .await?;

    let Some(trip_id) = first_trip else {
        return Err(QueryError::NotFound(
            "No trips found for the given route_id and direction_id".to_string(),
        ));
    };

    let stops: Vec<StopRow> = sqlx::query_as(
        "SELECT s.stop_id AS stop_id, s.stop_name AS stop_name, \
         CAST(s.stop_lat AS TEXT) AS stop_lat, CAST(s.stop_lon AS TEXT) AS stop_lon \
         FROM stop_times st JOIN stops s ON s.stop_id = st.stop_id \
         WHERE st.trip_id = ? ORDER BY st.stop_sequence",
    )
    .bind(&trip_id)
    .fetch_all(pool)
    .await?;

    Ok(stops.into_iter().map(RouteStop::from).collect())
}

pub async fn list_routes(pool: &SqlitePool) -> Result<Vec<RouteSummary>, QueryError> {
    let routes: Vec<RouteSummary> = sqlx::query_as(
        "SELECT route_id, route_short_name, route_long_name FROM routes ORDER BY route_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::memory_pool;

    async fn seed(pool: &SqlitePool) {
        for sql in [
            "INSERT INTO stops (stop_id, stop_name, stop_lat, stop_lon) VALUES ('S1', 'Main Street', '40.5', '-3.7')",
            "INSERT INTO stops (stop_id, stop_name, stop_lat, stop_lon) VALUES ('S2', 'Oak Avenue', '40.6', '')",
            "INSERT INTO stops (stop_id, stop_name, stop_lat, stop_lon) VALUES ('S3', '100% Plaza', NULL, NULL)",
            "INSERT INTO routes (route_id, route_short_name, route_long_name) VALUES ('R1', 'M1', 'Main Line')",
            "INSERT INTO routes (route_id, route_short_name, route_long_name) VALUES ('R2', 'X2', 'Express')",
            "INSERT INTO trips (trip_id, route_id, service_id, direction_id) VALUES ('T2', 'R1', 'SVC', 0)",
            "INSERT INTO trips (trip_id, route_id, service_id, direction_id) VALUES ('T1', 'R1', 'SVC', 1)",
            "INSERT INTO stop_times (trip_id, stop_id, stop_sequence) VALUES ('T2', 'S2', 2)",
            "INSERT INTO stop_times (trip_id, stop_id, stop_sequence) VALUES ('T2', 'S1', 1)",
            "INSERT INTO stop_times (trip_id, stop_id, stop_sequence) VALUES ('T1', 'S3', 1)",
        ] {
            sqlx::query(sql).execute(pool).await.unwrap();
        }
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("Main"), "%Main%");
        assert_eq!(contains_pattern("100%_x"), "%100\\%\\_x%");
    }

    #[test]
    fn test_coordinate_parsing() {
        assert_eq!(coordinate(Some(" 40.5 ")), Some(40.5));
        assert_eq!(coordinate(Some("")), None);
        assert_eq!(coordinate(Some("north")), None);
        assert_eq!(coordinate(None), None);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let pool = memory_pool().await;
        seed(&pool).await;

        let results = search(&pool, "MAIN").await.unwrap();
        assert_eq!(results.stops.len(), 1);
        assert_eq!(results.stops[0].stop_id, "S1");
        assert_eq!(results.stops[0].stop_lat, Some(40.5));
        assert!(results.routes.is_empty());

        let results = search(&pool, "m1").await.unwrap();
        assert_eq!(results.routes.len(), 1);
        assert_eq!(results.routes[0].route_long_name.as_deref(), Some("Main Line"));
    }

    #[tokio::test]
    async fn test_search_matches_non_ascii_names() {
        let pool = memory_pool().await;
        seed(&pool).await;
        sqlx::query("INSERT INTO stops (stop_id, stop_name) VALUES ('S4', 'ÉCOLE Centrale')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO routes (route_id, route_short_name) VALUES ('R3', 'Ñ1')")
            .execute(&pool)
            .await
            .unwrap();

        let results = search(&pool, "ÉCOLE").await.unwrap();
        assert_eq!(results.stops.len(), 1);
        assert_eq!(results.stops[0].stop_id, "S4");

        let results = search(&pool, "centrale").await.unwrap();
        assert_eq!(results.stops.len(), 1);

        let results = search(&pool, "Ñ1").await.unwrap();
        assert_eq!(results.routes.len(), 1);
        assert_eq!(results.routes[0].route_id, "R3");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let pool = memory_pool().await;
        seed(&pool).await;

        let results = search(&pool, "%").await.unwrap();
        assert_eq!(results.stops.len(), 1);
        assert_eq!(results.stops[0].stop_id, "S3");
        assert_eq!(results.stops[0].stop_lat, None);
    }

    #[tokio::test]
    async fn test_stops_for_route_uses_first_direction_zero_trip() {
        let pool = memory_pool().await;
        seed(&pool).await;

        let stops = stops_for_route(&pool, "R1").await.unwrap();
        let ids: Vec<&str> = stops.iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert_eq!(stops[0].lng, Some(-3.7));
        assert_eq!(stops[1].lng, None);
    }

    #[tokio::test]
    async fn test_stops_for_route_without_trip_is_not_found() {
        let pool = memory_pool().await;
        seed(&pool).await;

        let result = stops_for_route(&pool, "R2").await;
        assert!(matches!(result, Err(QueryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_routes() {
        let pool = memory_pool().await;
        seed(&pool).await;

        let routes = list_routes(&pool).await.unwrap();
        let ids: Vec<&str> = routes.iter().map(|r| r.route_id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
    }
}
