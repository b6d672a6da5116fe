mod full_keygen_flow;
mod lifecycle;
mod liquidation_recovery;
mod signature_flow;
mod storage_persistence;
