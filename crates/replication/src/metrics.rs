use metrics::{
    register_convex_gauge,
    register_convex_histogram,
};

register_convex_histogram!(pub APPLY_DURATION_SECONDS, "Time to apply one committed log entry");
register_convex_gauge!(pub APPLY_IN_FLIGHT, "Number of apply operations currently running (must stay <= 1)");
register_convex_gauge!(pub REPLICATION_LAG_ENTRIES, "commit_index - last_applied on this replica");
