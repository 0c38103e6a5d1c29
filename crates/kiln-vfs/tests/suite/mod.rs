mod coherence;
mod watched_cache;
