/*
 * Responsibility
 * - External collaborators behind narrow interfaces
 *   (cache, permission store, audit store, token verify/issue)
 */
pub mod audit;
pub mod auth;
pub mod cache;
pub mod permission;
