pub mod brr;
