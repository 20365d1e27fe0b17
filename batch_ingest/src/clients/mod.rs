pub mod kairos;
