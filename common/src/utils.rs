pub mod concurrency;
