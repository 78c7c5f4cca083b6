use metrics::{
    register_convex_counter,
    register_convex_histogram,
};

register_convex_histogram!(pub QUERY_DURATION_SECONDS, "Time to serve a /query request");
register_convex_histogram!(pub WRITE_DURATION_SECONDS, "Time to serve a write request end to end");
register_convex_counter!(pub CACHE_HIT_TOTAL, "Response cache hits since process start");
register_convex_counter!(pub CACHE_MISS_TOTAL, "Response cache misses since process start");
