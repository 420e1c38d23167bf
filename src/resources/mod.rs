pub mod pulps;
