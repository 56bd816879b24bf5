// ─── Server Setup Core ───
// Backend for provisioning a Minecraft server instance.
//
// Architecture:
//   core/
//     transactions/ Ordered copy / move / delete / download batches
//     progress/     Shared progress state + caller-facing handle
//     downloader/   Streaming HTTP downloads with byte progress
//     setup/        Server options + batch planning for a new instance
//     state/        Engine settings

pub mod downloader;
pub mod error;
pub mod http;
pub mod progress;
pub mod setup;
pub mod state;
pub mod transactions;
