mod environment;
mod version_gate;
