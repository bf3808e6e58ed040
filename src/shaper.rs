//! Result Shaper (spec §4.5, §6.2).
//!
//! Chooses one of four fixed SQL templates based on the request's
//! `(collection, geojson, pretty)` options and wraps the verbatim user
//! query in it. Ported 1:1 from the four `fmt.Sprintf` blocks in
//! `original_source/postpass/worker.go`; the gateway never parses or
//! rewrites the user's SQL beyond this fixed wrapping (spec's
//! SQL-injection non-goal).

use crate::handlers::QueryOptions;

/// Build the outer query to execute for `query`, given the requested
/// shape. The returned string always yields exactly one row and one
/// column when executed against a well-formed `query`.
pub fn wrap(query: &str, opts: QueryOptions, generator: &str) -> String {
    if !opts.collection {
        // Caller promises a single-row, single-column JSON-bearing
        // result; we execute the query exactly as submitted.
        return query.to_string();
    }

    if opts.geojson && opts.pretty {
        pretty_geojson(query, generator)
    } else if opts.geojson {
        compact_geojson(query, generator)
    } else {
        metadata_envelope(query, generator)
    }
}

fn pretty_geojson(query: &str, generator: &str) -> String {
    format!(
        "SELECT jsonb_pretty(jsonb_build_object(
            'type', 'FeatureCollection',
            'properties', jsonb_build_object(
               'timestamp', (select value from osm2pgsql_properties where property='replication_timestamp'),
               'generator', '{generator}'
               ),
            'features', coalesce(jsonb_agg(ST_AsGeoJSON(t.*)::json), '[]'::jsonb)))
        FROM ({query}) as t;"
    )
}

fn compact_geojson(query: &str, generator: &str) -> String {
    format!(
        "SELECT json_build_object(
            'type', 'FeatureCollection',
            'properties', jsonb_build_object(
               'timestamp', (select value from osm2pgsql_properties where property='replication_timestamp'),
               'generator', '{generator}'
               ),
            'features', coalesce(jsonb_agg(ST_AsGeoJSON(t.*)::json), '[]'::jsonb))
        FROM ({query}) as t;"
    )
}

fn metadata_envelope(query: &str, generator: &str) -> String {
    format!(
        "SELECT jsonb_pretty(jsonb_build_object(
            'metadata', jsonb_build_object(
               'timestamp', (select value from osm2pgsql_properties where property='replication_timestamp'),
               'generator', '{generator}'
               ),
            'result', jsonb_agg(t.*)::jsonb))
        FROM ({query}) as t;"
    )
}

/// Extension point flagged in spec §9 ("own-aggregation variant"): build
/// the `FeatureCollection` envelope in the gateway itself from features
/// already fetched one row at a time, instead of asking Postgres's
/// `jsonb_agg` to build the whole document server-side — the
/// aggregation half of sidestepping Postgres's JSON document size limit
/// on very large result sets. The row-streaming half (driving
/// `ST_AsGeoJSON` per row instead of the `jsonb_agg`/`coalesce` query in
/// [`pretty_geojson`]/[`compact_geojson`]) is not implemented here; a
/// caller wiring this up still needs its own `query_raw`-style row
/// iteration to produce `rows`. Not wired to any HTTP option today —
/// kept here, tested, and ready for a future request option to opt into
/// it.
pub fn shape_streamed(rows: &[serde_json::Value], generator: &str, timestamp: &str) -> String {
    let features = serde_json::Value::Array(rows.to_vec());
    serde_json::json!({
        "type": "FeatureCollection",
        "properties": {
            "timestamp": timestamp,
            "generator": generator,
        },
        "features": features,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(geojson: bool, pretty: bool, collection: bool) -> QueryOptions {
        QueryOptions {
            geojson,
            pretty,
            collection,
        }
    }

    #[test]
    fn bare_passthrough_when_collection_false() {
        let sql = wrap("SELECT 1", opts(true, true, false), "gen");
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn pretty_geojson_wraps_with_jsonb_pretty() {
        let sql = wrap("SELECT * FROM t", opts(true, true, true), "Postpass API 0.2");
        assert!(sql.starts_with("SELECT jsonb_pretty(jsonb_build_object("));
        assert!(sql.contains("'type', 'FeatureCollection'"));
        assert!(sql.contains("Postpass API 0.2"));
        assert!(sql.contains("FROM (SELECT * FROM t) as t;"));
    }

    #[test]
    fn compact_geojson_skips_jsonb_pretty() {
        let sql = wrap("SELECT * FROM t", opts(true, false, true), "gen");
        assert!(sql.starts_with("SELECT json_build_object("));
        assert!(!sql.contains("jsonb_pretty"));
    }

    #[test]
    fn metadata_envelope_when_geojson_false() {
        let sql = wrap("SELECT * FROM t", opts(false, true, true), "gen");
        assert!(sql.contains("'metadata', jsonb_build_object("));
        assert!(sql.contains("'result', jsonb_agg(t.*)::jsonb"));
        assert!(!sql.contains("FeatureCollection"));
    }

    #[test]
    fn streamed_shape_builds_a_feature_collection() {
        let rows = vec![serde_json::json!({"type": "Feature"})];
        let out = shape_streamed(&rows, "gen", "2024-01-01T00:00:00Z");
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"].as_array().unwrap().len(), 1);
    }
}
