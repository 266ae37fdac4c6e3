pub mod fake_storage;
