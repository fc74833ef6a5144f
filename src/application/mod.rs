// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Wires the lower layers together for one user-facing action.
// Nothing here touches tensors directly and nothing here prints;
// every use case returns a JSON payload or a path to Layer 1.

pub mod config;

// Train the head (or the traced graph) and checkpoint it
pub mod train_use_case;

// Rank classes, or measure, with the latest checkpoint
pub mod predict_use_case;

// Write a toy traced graph
pub mod trace_use_case;
